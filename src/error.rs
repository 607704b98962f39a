use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the face pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("failed to load image {url}: {reason}")]
    ImageLoad { url: String, reason: String },

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image dimensions are zero")]
    ZeroDimensions,

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("output file is missing or empty: {0}")]
    EmptyOutput(PathBuf),

    #[error("vision provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("embedding generation failed: {0}")]
    Embedding(String),

    #[error("face store error: {0}")]
    Store(String),

    #[error("face {0} not found")]
    FaceNotFound(i64),

    #[error("person {0} not found")]
    PersonNotFound(i64),

    #[error("face recognition is disabled")]
    RecognitionDisabled,

    #[error("processing queue closed")]
    QueueClosed,

    #[error("job for event {event_id} timed out after {timeout:?}")]
    Timeout { event_id: i64, timeout: Duration },

    #[error("job for event {event_id} panicked")]
    Panicked { event_id: i64 },

    #[error("job for event {event_id} was abandoned")]
    Abandoned { event_id: i64 },
}

pub type FaceResult<T> = Result<T, FaceError>;
