use serde::Serialize;
use tokio::sync::mpsc;

/// Events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaceNotification {
    #[serde(rename_all = "camelCase")]
    UnknownFaceDetected {
        event_id: i64,
        face_id: i64,
        confidence: f32,
        quality_score: f32,
        thumbnail_path: String,
    },
    #[serde(rename_all = "camelCase")]
    FaceRecognized {
        event_id: i64,
        face_id: i64,
        person_id: i64,
        person_name: String,
        confidence: f32,
        similarity: f32,
    },
    #[serde(rename_all = "camelCase")]
    FaceProcessingComplete {
        event_id: i64,
        faces_detected: usize,
        faces_processed: usize,
        merged_duplicates: usize,
    },
    #[serde(rename_all = "camelCase")]
    FaceProcessingError { event_id: i64, error: String },
}

impl FaceNotification {
    pub fn event_id(&self) -> i64 {
        match self {
            FaceNotification::UnknownFaceDetected { event_id, .. }
            | FaceNotification::FaceRecognized { event_id, .. }
            | FaceNotification::FaceProcessingComplete { event_id, .. }
            | FaceNotification::FaceProcessingError { event_id, .. } => *event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FaceNotification::UnknownFaceDetected { .. } => "unknown_face_detected",
            FaceNotification::FaceRecognized { .. } => "face_recognized",
            FaceNotification::FaceProcessingComplete { .. } => "face_processing_complete",
            FaceNotification::FaceProcessingError { .. } => "face_processing_error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!(r#"{{"type":"{}"}}"#, self.kind()))
    }
}

/// Fire-and-forget delivery; a failed delivery never fails the pipeline.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: FaceNotification);
}

/// Writes each notification to the log as JSON.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: FaceNotification) {
        tracing::info!(
            kind = notification.kind(),
            event_id = notification.event_id(),
            payload = %notification.to_json(),
            "Face notification"
        );
    }
}

/// Forwards notifications to a receiver, e.g. a websocket broadcaster.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<FaceNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FaceNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: FaceNotification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::debug!(kind = e.0.kind(), "Notification receiver dropped");
        }
    }
}
