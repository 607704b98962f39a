//! Face ingestion for doorbell camera events.
//!
//! A [`faces::FacePipeline`] turns one provider response into deduplicated,
//! cropped, scored and (when possible) identified face records. Events are
//! fed through a [`faces::ProcessingQueue`] so they run one at a time.

pub mod collab;
pub mod config;
pub mod error;
pub mod faces;
pub mod logging;

pub use config::Config;
pub use error::{FaceError, FaceResult};
