use std::fs;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;

pub(crate) const METADATA_FILE: &str = "storyboard.json";

/// The four fields the prompt asks for. Missing and `null` both read as
/// `None`; the defaults live in the `Segment` accessors.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
struct SegmentFields {
    #[serde(rename = "startTime")]
    start_time: Option<f64>,
    #[serde(rename = "endTime")]
    end_time: Option<f64>,
    script: Option<String>,
    description: Option<String>,
}

/// One timestamped slice of the video as returned by the model.
///
/// The object is kept exactly as received (key order, `null`s, extra keys)
/// and written back from that copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Segment {
    raw: Map<String, Value>,
    fields: SegmentFields,
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Map::deserialize(deserializer)?;
        let fields = SegmentFields::deserialize(&Value::Object(raw.clone()))
            .map_err(D::Error::custom)?;
        Ok(Self { raw, fields })
    }
}

impl Segment {
    /// Start in seconds, `0` when missing, never negative.
    pub(crate) fn start_secs(&self) -> f64 {
        self.fields.start_time.unwrap_or(0.0).max(0.0)
    }

    /// End in seconds, `start + 1` when missing, never before the start.
    pub(crate) fn end_secs(&self) -> f64 {
        let start = self.start_secs();
        self.fields.end_time.unwrap_or(start + 1.0).max(start)
    }

    pub(crate) fn midpoint_secs(&self) -> f64 {
        let start = self.start_secs();
        start + (self.end_secs() - start) / 2.0
    }

    pub(crate) fn midpoint_ms(&self) -> i64 {
        (self.midpoint_secs() * 1000.0).round() as i64
    }

    pub(crate) fn script(&self) -> &str {
        self.fields.script.as_deref().unwrap_or_default()
    }

    pub(crate) fn description(&self) -> &str {
        self.fields.description.as_deref().unwrap_or_default()
    }

    /// First `max_chars` characters of the script.
    pub(crate) fn script_snippet(&self, max_chars: usize) -> &str {
        let script = self.script();
        match script.char_indices().nth(max_chars) {
            Some((end, _)) => &script[..end],
            None => script,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Storyboard(Vec<Segment>);

impl Storyboard {
    pub(crate) fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes `storyboard.json` into `output_dir` and returns its path.
    pub(crate) fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(METADATA_FILE);
        fs::write(&path, self.to_pretty_json()?)?;
        Ok(path)
    }
}
