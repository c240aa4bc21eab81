use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum TeardownError {
    #[error("Please set your {0} environment variable.")]
    MissingApiKey(&'static str),

    #[error("Video file not found at {}", .0.display())]
    VideoNotFound(PathBuf),

    /// Network, authentication, HTTP status and response parsing failures all
    /// end up here.
    #[error("Storyboard extraction failed: {0}")]
    Extraction(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub(crate) type Result<T> = std::result::Result<T, TeardownError>;

impl TeardownError {
    /// Failures detected before any request or output.
    pub(crate) fn is_precondition(&self) -> bool {
        matches!(self, Self::MissingApiKey(_) | Self::VideoNotFound(_))
    }
}
