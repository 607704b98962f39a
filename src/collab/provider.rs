use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use super::image_source::SourceImage;
use crate::error::{FaceError, FaceResult};
use crate::faces::types::Detection;

/// A service that finds faces in an image.
///
/// Bounding boxes come back in whatever convention the provider prefers;
/// the pipeline resolves the format itself.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn detect_faces(&self, image: &SourceImage) -> FaceResult<Vec<Detection>>;

    /// Provider name for logs and errors.
    fn provider_name(&self) -> &str;
}

/// Provider responses come either as a bare array or wrapped in `faces`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayPayload {
    Bare(Vec<Detection>),
    Wrapped { faces: Vec<Detection> },
}

/// Replays a recorded provider response for every image.
#[derive(Debug, Clone, Default)]
pub struct ReplayProvider {
    detections: Vec<Detection>,
}

impl ReplayProvider {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn from_json(json: &str) -> FaceResult<Self> {
        let payload: ReplayPayload = serde_json::from_str(json).map_err(|e| FaceError::Provider {
            provider: "replay".to_string(),
            reason: format!("invalid detection JSON: {}", e),
        })?;

        let detections = match payload {
            ReplayPayload::Bare(faces) | ReplayPayload::Wrapped { faces } => faces,
        };
        Ok(Self::new(detections))
    }

    pub fn from_file(path: &Path) -> FaceResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| FaceError::Provider {
            provider: "replay".to_string(),
            reason: format!("reading {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[async_trait]
impl VisionProvider for ReplayProvider {
    async fn detect_faces(&self, image: &SourceImage) -> FaceResult<Vec<Detection>> {
        tracing::debug!(
            url = %image.url,
            faces = self.detections.len(),
            "Replaying recorded detections"
        );
        Ok(self.detections.clone())
    }

    fn provider_name(&self) -> &str {
        "replay"
    }
}
