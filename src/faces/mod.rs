pub mod coordinates;
pub mod crop;
pub mod dedup;
pub mod embedding;
pub mod ledger;
pub mod matcher;
pub mod pipeline;
pub mod quality;
pub mod queue;
pub mod types;

pub use coordinates::{CoordinateFormat, CoordinateNormalizer};
pub use crop::{Cropper, DirectoryLayout, StorageLayout};
pub use dedup::Deduplicator;
pub use embedding::{DescriptionEmbedder, EmbeddingGenerator, FaceEmbedding};
pub use matcher::IdentityMatcher;
pub use pipeline::{Collaborators, EventSummary, FacePipeline};
pub use quality::QualityScorer;
pub use queue::{JobHandler, ProcessingQueue, QueueStats};
pub use types::{BoundingBox, Detection, NormalizedRegion, ProcessingJob};
