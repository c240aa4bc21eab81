use std::path::Path;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use tracing::debug;

use crate::error::Result;

const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// The whole input video, base64 encoded for an inline request part.
#[derive(Debug, Clone)]
pub(crate) struct VideoPayload {
    pub mime_type: &'static str,
    pub data: String,
}

impl VideoPayload {
    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "read video into memory");
        Ok(Self::from_bytes(&bytes, mime_type_for(path)))
    }

    pub(crate) fn from_bytes(bytes: &[u8], mime_type: &'static str) -> Self {
        Self {
            mime_type,
            data: BASE64_STANDARD.encode(bytes),
        }
    }

    pub(crate) fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

pub(crate) fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("3gp") => "video/3gpp",
        Some("flv") => "video/x-flv",
        Some("wmv") => "video/x-ms-wmv",
        _ => DEFAULT_MIME_TYPE,
    }
}
