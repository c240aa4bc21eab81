use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Once;

use ffmpeg::util::frame::video::Video;
use ffmpeg::{decoder, format, media, rescale, software, Rational, Rescale};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::{ExtendedColorType, RgbImage};
use tracing::{debug, warn};

use crate::error::{Result, TeardownError};
use crate::storyboard::Storyboard;

const SNIPPET_CHARS: usize = 30;

static INIT: Once = Once::new();

pub(crate) fn init() -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = ffmpeg::init().map_err(TeardownError::from);
    });
    result
}

/// Something that can hand out a still image for a point in time.
pub(crate) trait FrameSource {
    fn frame_at(&mut self, position_ms: i64) -> Result<RgbImage>;
}

/// An open demuxer and decoder for the best video stream of a file.
///
/// The handle is a single cursor: every `frame_at` call seeks it.
pub(crate) struct VideoDecoder {
    input: format::context::Input,
    decoder: decoder::Video,
    scaler: software::scaling::Context,
    stream_index: usize,
    time_base: Rational,
    /// First pts of the stream; positions are measured from here.
    start_pts: i64,
    duration_ms: Option<i64>,
}

impl VideoDecoder {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        init()?;
        let input = format::input(&path)?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_pts = match stream.start_time() {
            pts if pts == ffmpeg::ffi::AV_NOPTS_VALUE => 0,
            pts => pts,
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let scaler = software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            software::scaling::Flags::BILINEAR,
        )?;

        let duration_ms = match input.duration() {
            d if d > 0 => Some(d.rescale(rescale::TIME_BASE, (1, 1000))),
            _ => None,
        };

        debug!(
            path = %path.display(),
            width = decoder.width(),
            height = decoder.height(),
            start_pts,
            ?duration_ms,
            "opened video decoder"
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            time_base,
            start_pts,
            duration_ms,
        })
    }

    fn to_image(&mut self, decoded: &Video) -> Result<RgbImage> {
        let mut rgb = Video::empty();
        self.scaler.run(decoded, &mut rgb)?;

        let (width, height) = (rgb.width(), rgb.height());
        let row_bytes = width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            pixels.extend_from_slice(&data[row * stride..row * stride + row_bytes]);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| TeardownError::Capture("Failed to create image buffer".to_owned()))
    }
}

impl FrameSource for VideoDecoder {
    fn frame_at(&mut self, position_ms: i64) -> Result<RgbImage> {
        if let Some(duration_ms) = self.duration_ms {
            if position_ms > duration_ms {
                return Err(TeardownError::Capture(format!(
                    "{position_ms}ms is past the end of the video ({duration_ms}ms)"
                )));
            }
        }

        let target_pts = self.start_pts + position_ms.rescale((1, 1000), self.time_base);
        let seek_ts = target_pts.rescale(self.time_base, rescale::TIME_BASE);
        self.input.seek(seek_ts, ..seek_ts)?;
        self.decoder.flush();

        let mut last = None;
        let mut found = None;

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            found = receive_until(&mut self.decoder, target_pts, &mut last);
            if found.is_some() {
                break;
            }
        }

        if found.is_none() {
            self.decoder.send_eof()?;
            found = receive_until(&mut self.decoder, target_pts, &mut last);
        }

        // The stream ended between the last frame and the requested position.
        let frame = found.or(last).ok_or_else(|| {
            TeardownError::Capture(format!("no frame decoded at {position_ms}ms"))
        })?;
        self.to_image(&frame)
    }
}

/// Drains the decoder until a frame at or after `target_pts` comes out,
/// remembering the latest earlier frame in `last`.
fn receive_until(
    decoder: &mut decoder::Video,
    target_pts: i64,
    last: &mut Option<Video>,
) -> Option<Video> {
    let mut decoded = Video::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        if decoded.timestamp().map_or(true, |pts| pts >= target_pts) {
            return Some(decoded);
        }
        *last = Some(decoded.clone());
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CaptureStatus {
    Captured { path: PathBuf },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CaptureOutcome {
    pub index: usize,
    pub midpoint_secs: f64,
    pub status: CaptureStatus,
}

impl CaptureOutcome {
    pub(crate) fn is_captured(&self) -> bool {
        matches!(self.status, CaptureStatus::Captured { .. })
    }
}

pub(crate) fn frame_file_name(index: usize) -> String {
    format!("frame_{index:03}.jpg")
}

fn write_jpeg(image: &RgbImage, path: &Path) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut encoder = jpeg::JpegEncoder::new(BufWriter::new(file));
    encoder.encode(
        image,
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

/// Grabs one frame at the midpoint of every segment and writes it next to
/// the storyboard. A segment whose frame cannot be decoded is skipped.
pub(crate) fn capture_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    storyboard: &Storyboard,
    output_dir: &Path,
) -> Result<Vec<CaptureOutcome>> {
    fs::create_dir_all(output_dir)?;

    let total = storyboard.len();
    let mut outcomes = Vec::with_capacity(total);
    for (index, segment) in storyboard.segments().iter().enumerate() {
        let midpoint_secs = segment.midpoint_secs();

        let status = match source.frame_at(segment.midpoint_ms()) {
            Ok(image) => {
                let path = output_dir.join(frame_file_name(index));
                write_jpeg(&image, &path)?;
                println!(
                    "[{}/{}] Captured frame at {:.2}s: {}...",
                    index + 1,
                    total,
                    midpoint_secs,
                    segment.script_snippet(SNIPPET_CHARS)
                );
                CaptureStatus::Captured { path }
            }
            Err(e) => {
                debug!(
                    index,
                    midpoint_secs,
                    description = segment.description(),
                    error = %e,
                    "skipping segment without a frame"
                );
                CaptureStatus::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        outcomes.push(CaptureOutcome {
            index,
            midpoint_secs,
            status,
        });
    }

    let skipped = outcomes.iter().filter(|o| !o.is_captured()).count();
    if skipped > 0 {
        warn!(skipped, total, "some segments have no frame");
    }

    Ok(outcomes)
}
