//! Data carried between pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Bounding box as reported by a vision provider.
///
/// The unit is ambiguous on input (fraction, percent or pixel); after
/// [`CoordinateNormalizer::to_percent`](super::coordinates::CoordinateNormalizer::to_percent)
/// it is always a top-left anchored percentage box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Provider-reported capture quality, ordered best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum QualityTag {
    Clear,
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

impl QualityTag {
    /// Lower is better.
    pub fn rank(self) -> u8 {
        match self {
            QualityTag::Clear => 0,
            QualityTag::Good => 1,
            QualityTag::Fair => 2,
            QualityTag::Poor => 3,
            QualityTag::Unknown => 4,
        }
    }

    pub fn best<I: IntoIterator<Item = QualityTag>>(tags: I) -> QualityTag {
        tags.into_iter()
            .min_by_key(|tag| tag.rank())
            .unwrap_or_default()
    }
}

impl From<String> for QualityTag {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "clear" => QualityTag::Clear,
            "good" => QualityTag::Good,
            "fair" => QualityTag::Fair,
            "poor" => QualityTag::Poor,
            _ => QualityTag::Unknown,
        }
    }
}

/// A single face reported by a vision provider, or the merge of several.
///
/// `merged_from` is 1 for detections straight from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,

    pub bounding_box: BoundingBox,

    /// 0-100
    #[serde(default)]
    pub confidence: f32,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "quality_tag")]
    pub quality: QualityTag,

    #[serde(default)]
    pub distinctive_features: Vec<String>,

    #[serde(default = "default_merged_from")]
    pub merged_from: usize,
}

fn default_merged_from() -> usize {
    1
}

/// Providers emit ids as either strings or numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Detection {
    pub fn new(id: impl Into<String>, bounding_box: BoundingBox, confidence: f32) -> Self {
        Self {
            id: id.into(),
            bounding_box,
            confidence,
            description: String::new(),
            quality: QualityTag::Unknown,
            distinctive_features: Vec::new(),
            merged_from: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_quality(mut self, quality: QualityTag) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinctive_features = features.into_iter().map(Into::into).collect();
        self
    }
}

/// Pixel rectangle guaranteed to lie inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NormalizedRegion {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Crop and thumbnail written for one face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceCrop {
    pub face_id: String,
    pub crop_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// One queued visitor event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingJob {
    pub event_id: i64,
    pub image_url: String,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(event_id: i64, image_url: impl Into<String>) -> Self {
        Self {
            event_id,
            image_url: image_url.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Lifecycle of a single face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceState {
    Detected,
    Deduplicated,
    Cropped,
    Scored,
    Embedded,
    AutoAssigned,
    PendingLabel,
    ManualReassigned,
    Deleted,
}
