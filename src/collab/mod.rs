//! Services the pipeline talks to but does not own.

pub mod image_source;
pub mod notify;
pub mod provider;
pub mod store;

pub use image_source::{ImageLoader, ImageSource, SourceImage};
pub use notify::{ChannelNotifier, FaceNotification, LogNotifier, Notifier};
pub use provider::{ReplayProvider, VisionProvider};
pub use store::{EventLabel, FaceStore, MemoryFaceStore, NewEncoding};
