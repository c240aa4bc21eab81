use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{info, warn};

use crate::ai::{self, StoryboardExtractor};
use crate::capture::{self, CaptureOutcome, CaptureStatus, FrameSource};
use crate::error::{Result, TeardownError};
use crate::storyboard::Storyboard;
use crate::video::VideoPayload;

pub(crate) const API_KEY_VAR: &str = "API_KEY";

/// Everything a finished run produced.
#[derive(Debug)]
pub(crate) struct RunReport {
    pub storyboard: Storyboard,
    pub outcomes: Vec<CaptureOutcome>,
    pub output_dir: PathBuf,
    pub metadata_path: PathBuf,
}

impl RunReport {
    pub(crate) fn captured(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_captured()).count()
    }

    pub(crate) fn print_summary(&self) {
        println!("\nTeardown complete!");
        println!(
            "Captured {} of {} frames.",
            self.captured(),
            self.storyboard.len()
        );
        for outcome in self.outcomes.iter().filter(|o| !o.is_captured()) {
            if let CaptureStatus::Skipped { reason } = &outcome.status {
                println!(
                    "  no frame for segment {} at {:.2}s ({reason})",
                    outcome.index, outcome.midpoint_secs
                );
            }
        }
        println!("Frames and metadata saved to: {}/", self.output_dir.display());
        println!("Review the full script in: {}", self.metadata_path.display());
    }
}

/// Checks the credential and the input file before anything touches the
/// network or the output directory. Returns the credential.
pub(crate) fn check_preconditions(api_key: Option<String>, video: &Path) -> Result<String> {
    let api_key = api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or(TeardownError::MissingApiKey(API_KEY_VAR))?;
    if !video.exists() {
        return Err(TeardownError::VideoNotFound(video.to_path_buf()));
    }
    Ok(api_key)
}

/// Stands in for a video the decoder could not open. Every segment is
/// skipped, the storyboard is still written.
struct Unreadable(String);

impl FrameSource for Unreadable {
    fn frame_at(&mut self, _position_ms: i64) -> Result<RgbImage> {
        Err(TeardownError::Capture(self.0.clone()))
    }
}

/// Checks the preconditions, then builds the extractor and runs. When a
/// precondition fails nothing is read, built or created.
pub(crate) async fn teardown<B, S, F>(
    api_key: Option<String>,
    video_path: &Path,
    output_dir: &Path,
    build_extractor: B,
    open_source: F,
) -> Result<RunReport>
where
    B: FnOnce(String) -> Result<Box<dyn StoryboardExtractor>>,
    S: FrameSource + 'static,
    F: FnOnce(&Path) -> Result<S>,
{
    let api_key = check_preconditions(api_key, video_path)?;
    println!("--- Teardown: Starting Analysis for {} ---", video_path.display());

    let extractor = build_extractor(api_key)?;
    run(extractor.as_ref(), video_path, output_dir, open_source).await
}

pub(crate) async fn run<S, F>(
    extractor: &dyn StoryboardExtractor,
    video_path: &Path,
    output_dir: &Path,
    open_source: F,
) -> Result<RunReport>
where
    S: FrameSource + 'static,
    F: FnOnce(&Path) -> Result<S>,
{
    println!("Step 1: AI Transcription & Visual Analysis...");
    let video = VideoPayload::load(video_path).await?;
    let storyboard = ai::extract_storyboard(extractor, &video).await?;
    drop(video);

    if storyboard.is_empty() {
        warn!("model returned an empty storyboard");
    }

    println!("Step 2: Processing {} segments...", storyboard.len());
    let mut source: Box<dyn FrameSource> = match open_source(video_path) {
        Ok(source) => Box::new(source),
        Err(e) => {
            warn!(error = %e, "could not open video for frame capture");
            Box::new(Unreadable(e.to_string()))
        }
    };
    let outcomes = capture::capture_frames(source.as_mut(), &storyboard, output_dir)?;
    drop(source);

    let metadata_path = storyboard.save(output_dir)?;
    info!(path = %metadata_path.display(), "wrote storyboard metadata");

    Ok(RunReport {
        storyboard,
        outcomes,
        output_dir: output_dir.to_path_buf(),
        metadata_path,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::capture::tests::{write_test_clip, ScriptedSource};
    use crate::capture::{frame_file_name, VideoDecoder};
    use crate::storyboard::METADATA_FILE;

    const TWO_SEGMENTS: &str = r#"[{"startTime":0,"endTime":4,"script":"Hello","description":"intro"},{"startTime":4,"endTime":10,"script":"World","description":"outro"}]"#;

    struct StubExtractor(String);

    impl StubExtractor {
        fn replying(text: &str) -> Self {
            Self(text.to_owned())
        }
    }

    #[async_trait]
    impl StoryboardExtractor for StubExtractor {
        async fn generate(&self, _video: &VideoPayload, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn five_segments() -> String {
        let segments: Vec<Value> = (0..5)
            .map(|i| serde_json::json!({"startTime": i, "endTime": i + 1, "script": "", "description": ""}))
            .collect();
        serde_json::to_string(&segments).unwrap()
    }

    fn fake_video(dir: &Path) -> PathBuf {
        let path = dir.join("clip.mp4");
        fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[tokio::test]
    async fn missing_or_blank_key_stops_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");

        for api_key in [None, Some(String::new()), Some("  ".to_owned())] {
            let built = Cell::new(false);
            let err = teardown(
                api_key,
                &video,
                &output,
                |_| -> Result<Box<dyn StoryboardExtractor>> {
                    built.set(true);
                    Ok(Box::new(StubExtractor::replying(TWO_SEGMENTS)))
                },
                |_| Ok(ScriptedSource::new(&[])),
            )
            .await
            .unwrap_err();

            assert!(matches!(err, TeardownError::MissingApiKey(API_KEY_VAR)));
            assert!(err.is_precondition());
            assert!(!built.get());
            assert!(!output.exists());
        }
    }

    #[tokio::test]
    async fn missing_video_stops_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let built = Cell::new(false);

        let err = teardown(
            Some("key".to_owned()),
            &dir.path().join("nope.mp4"),
            &output,
            |_| -> Result<Box<dyn StoryboardExtractor>> {
                built.set(true);
                Ok(Box::new(StubExtractor::replying(TWO_SEGMENTS)))
            },
            |_| Ok(ScriptedSource::new(&[])),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TeardownError::VideoNotFound(_)));
        assert!(!built.get());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn ten_second_clip_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        write_test_clip(&video, 10, 0, 10).unwrap();
        let output = dir.path().join("out");

        let report = teardown(
            Some("key".to_owned()),
            &video,
            &output,
            |api_key| -> Result<Box<dyn StoryboardExtractor>> {
                assert_eq!(api_key, "key");
                Ok(Box::new(StubExtractor::replying(TWO_SEGMENTS)))
            },
            VideoDecoder::open,
        )
        .await
        .unwrap();

        assert_eq!(report.captured(), 2);
        assert!(output.join("frame_000.jpg").is_file());
        assert!(output.join("frame_001.jpg").is_file());
        let written: Value =
            serde_json::from_str(&fs::read_to_string(output.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(written, serde_json::from_str::<Value>(TWO_SEGMENTS).unwrap());
    }

    #[test]
    fn missing_video_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("nope.mp4");

        let err = check_preconditions(Some("key".to_owned()), &video).unwrap_err();
        assert!(matches!(err, TeardownError::VideoNotFound(path) if path == video));
    }

    #[test]
    fn valid_inputs_return_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());

        assert_eq!(check_preconditions(Some("key".to_owned()), &video).unwrap(), "key");
    }

    #[tokio::test]
    async fn end_to_end_writes_frames_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");

        let report = run(&StubExtractor::replying(TWO_SEGMENTS), &video, &output, |_| {
            Ok(ScriptedSource::new(&[]))
        })
        .await
        .unwrap();

        assert!(output.join("frame_000.jpg").is_file());
        assert!(output.join("frame_001.jpg").is_file());
        assert_eq!(report.metadata_path, output.join(METADATA_FILE));
        assert_eq!(report.captured(), 2);

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&report.metadata_path).unwrap()).unwrap();
        let expected: Value = serde_json::from_str(TWO_SEGMENTS).unwrap();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn skipped_segment_still_in_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");

        let report = run(&StubExtractor(five_segments()), &video, &output, |_| {
            Ok(ScriptedSource::new(&[2]))
        })
        .await
        .unwrap();

        for i in [0, 1, 3, 4] {
            assert!(output.join(frame_file_name(i)).is_file());
        }
        assert!(!output.join(frame_file_name(2)).exists());
        assert!(matches!(report.outcomes[2].status, CaptureStatus::Skipped { .. }));

        let written: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(output.join(METADATA_FILE)).unwrap())
                .unwrap();
        assert_eq!(written.len(), 5);
    }

    #[tokio::test]
    async fn malformed_response_stops_before_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");
        let opened = Cell::new(false);

        let err = run(&StubExtractor::replying("I watched it, it was great."), &video, &output, |_| {
            opened.set(true);
            Ok(ScriptedSource::new(&[]))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TeardownError::Extraction(_)));
        assert!(!opened.get());
        assert!(!output.join(METADATA_FILE).exists());
    }

    #[tokio::test]
    async fn unopenable_video_skips_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");

        let report = run(&StubExtractor::replying(TWO_SEGMENTS), &video, &output, |_| {
            Err::<ScriptedSource, _>(TeardownError::Capture("no video stream".to_owned()))
        })
        .await
        .unwrap();

        assert_eq!(report.captured(), 0);
        assert_eq!(report.outcomes.len(), 2);
        assert!(!output.join(frame_file_name(0)).exists());
        assert!(output.join(METADATA_FILE).is_file());
    }

    #[tokio::test]
    async fn empty_storyboard_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let video = fake_video(dir.path());
        let output = dir.path().join("out");

        let report = run(&StubExtractor::replying("[]"), &video, &output, |_| {
            Ok(ScriptedSource::new(&[]))
        })
        .await
        .unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(fs::read_to_string(output.join(METADATA_FILE)).unwrap(), "[]");
    }
}
