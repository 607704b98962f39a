//! Per-event orchestration: detect, merge duplicates, crop, score, embed,
//! match, persist and notify.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::coordinates::{validate_region, CoordinateNormalizer};
use super::crop::{Cropper, StorageLayout};
use super::dedup::Deduplicator;
use super::embedding::{DescriptionEmbedder, EmbeddingGenerator, EmbeddingMethod, FaceEmbedding};
use super::ledger::{FileLedger, RunFiles};
use super::matcher::{IdentityMatch, IdentityMatcher};
use super::quality::QualityScorer;
use super::queue::JobHandler;
use super::types::{Detection, FaceCrop, ProcessingJob};
use crate::collab::image_source::{ImageSource, SourceImage};
use crate::collab::notify::{FaceNotification, Notifier};
use crate::collab::provider::VisionProvider;
use crate::collab::store::{Assignment, FaceStore, NewEncoding, NewFace};
use crate::config::{Config, RecognitionConfig, StorageConfig};
use crate::error::{FaceError, FaceResult};

/// What happened to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: i64,
    /// Raw provider detections, before merging.
    pub faces_detected: usize,
    pub faces_processed: usize,
    pub merged_duplicates: usize,
    pub recognized: usize,
    pub pending_label: usize,
    /// Recognition was disabled; nothing ran.
    pub skipped: bool,
}

/// How a single stored face was routed.
enum FaceOutcome {
    Recognized,
    PendingLabel,
}

/// External services the pipeline depends on.
pub struct Collaborators {
    pub provider: Arc<dyn VisionProvider>,
    pub images: Arc<dyn ImageSource>,
    pub store: Arc<dyn FaceStore>,
    pub notifier: Arc<dyn Notifier>,
    pub layout: Arc<dyn StorageLayout>,
}

pub struct FacePipeline {
    recognition: RecognitionConfig,
    storage: StorageConfig,
    normalizer: CoordinateNormalizer,
    deduplicator: Deduplicator,
    cropper: Arc<Cropper>,
    scorer: QualityScorer,
    embedder: Arc<dyn EmbeddingGenerator>,
    matcher: IdentityMatcher,
    provider: Arc<dyn VisionProvider>,
    images: Arc<dyn ImageSource>,
    store: Arc<dyn FaceStore>,
    notifier: Arc<dyn Notifier>,
    ledger: FileLedger,
}

impl FacePipeline {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self {
            recognition: config.recognition.clone(),
            storage: config.storage.clone(),
            normalizer: CoordinateNormalizer::new(),
            deduplicator: Deduplicator::new(config.dedup.clone()),
            cropper: Arc::new(Cropper::new(config.crop.clone(), collaborators.layout)),
            scorer: QualityScorer::new(),
            embedder: Arc::new(DescriptionEmbedder::new()),
            matcher: IdentityMatcher::new(config.recognition.confidence_threshold),
            provider: collaborators.provider,
            images: collaborators.images,
            store: collaborators.store,
            notifier: collaborators.notifier,
            ledger: FileLedger::new(),
        }
    }

    /// Swap in a different embedding model.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Run every stage for one event. Errors here abort the whole event;
    /// per-face failures are logged and skipped instead. Crops that did not
    /// end up in a stored face are deleted once the event is over.
    pub async fn process_event(&self, job: &ProcessingJob) -> FaceResult<EventSummary> {
        let (run, stale) = self.ledger.begin(job.event_id);
        self.discard(job.event_id, stale);

        let result = self.run_event(job, &run).await;
        let orphans = self.ledger.close(job.event_id);
        self.discard(job.event_id, orphans);
        result
    }

    fn discard(&self, event_id: i64, files: Vec<PathBuf>) {
        if files.is_empty() {
            return;
        }
        tracing::debug!(event_id, files = files.len(), "Removing unstored face files");
        self.cropper.remove_paths(files.iter().map(PathBuf::as_path));
    }

    async fn run_event(&self, job: &ProcessingJob, run: &Arc<RunFiles>) -> FaceResult<EventSummary> {
        let event_id = job.event_id;
        let mut summary = EventSummary {
            event_id,
            ..Default::default()
        };

        if !self.recognition.enabled {
            tracing::debug!(event_id, "Face recognition disabled, skipping event");
            self.store.mark_event_processed(event_id, 0).await?;
            summary.skipped = true;
            return Ok(summary);
        }

        let image = self.images.load(&job.image_url).await?;
        let raw = self.provider.detect_faces(&image).await?;
        summary.faces_detected = raw.len();

        tracing::info!(
            event_id,
            provider = self.provider.provider_name(),
            detections = raw.len(),
            width = image.width,
            height = image.height,
            "Received face detections"
        );

        if raw.is_empty() {
            self.store.mark_event_processed(event_id, 0).await?;
            self.notify_complete(&summary);
            return Ok(summary);
        }

        // Resolve every box to top-left percentages before comparing them.
        let mut canonical = Vec::with_capacity(raw.len());
        for detection in raw {
            let (_, percent) =
                self.normalizer
                    .to_percent(&detection.bounding_box, image.width, image.height)?;
            canonical.push(Detection {
                bounding_box: percent,
                ..detection
            });
        }

        let merged = self.deduplicator.deduplicate(&canonical);
        let stats = self.deduplicator.stats(&canonical, &merged);
        summary.merged_duplicates = stats.removed;

        for (index, detection) in merged.iter().enumerate() {
            match self.process_face(job, run, &image, detection, index + 1).await {
                Ok(FaceOutcome::Recognized) => {
                    summary.faces_processed += 1;
                    summary.recognized += 1;
                }
                Ok(FaceOutcome::PendingLabel) => {
                    summary.faces_processed += 1;
                    summary.pending_label += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id,
                        detection = %detection.id,
                        error = %e,
                        "Skipping face"
                    );
                }
            }
        }

        self.store
            .mark_event_processed(event_id, summary.faces_processed)
            .await?;
        self.notify_complete(&summary);

        tracing::info!(
            event_id,
            detected = summary.faces_detected,
            processed = summary.faces_processed,
            merged = summary.merged_duplicates,
            recognized = summary.recognized,
            "Face processing complete"
        );

        Ok(summary)
    }

    async fn process_face(
        &self,
        job: &ProcessingJob,
        run: &Arc<RunFiles>,
        image: &SourceImage,
        detection: &Detection,
        ordinal: usize,
    ) -> FaceResult<FaceOutcome> {
        let event_id = job.event_id;
        let region = self.normalizer.region_from_percent(
            &detection.bounding_box,
            image.width,
            image.height,
        )?;

        for warning in validate_region(&region, image.width, image.height) {
            tracing::warn!(event_id, ?warning, ?region, "Suspicious face region");
        }

        let file_id = format!("{}_face_{}_{}", event_id, ordinal, Utc::now().timestamp_millis());
        let (crop_path, thumbnail_path) = self.cropper.output_paths(&file_id)?;
        if !run.track(&[&crop_path, &thumbnail_path]) {
            return Err(FaceError::Abandoned { event_id });
        }

        let cropper = self.cropper.clone();
        let source = image.image.clone();
        let crop_id = file_id.clone();
        let crop_run = run.clone();
        let crop = tokio::task::spawn_blocking(move || -> FaceResult<FaceCrop> {
            let crop = cropper.crop(&source, &region, &crop_id)?;
            // The run may have been abandoned while this was writing.
            if crop_run.is_abandoned() {
                cropper.remove_files(&crop.crop_path, &crop.thumbnail_path);
                return Err(FaceError::Abandoned { event_id });
            }
            Ok(crop)
        })
        .await
        .map_err(|_| FaceError::Panicked { event_id })??;

        let quality_score = self
            .scorer
            .score(detection, &region, image.width, image.height);

        let embedding = match self.embedder.generate(&crop.crop_path, &detection.description) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(event_id, error = %e, "Embedding failed, using hash placeholder");
                let detection_json = serde_json::to_string(detection).unwrap_or_default();
                FaceEmbedding::hashed(&job.image_url, &detection_json)
            }
        };

        let new_face = NewFace {
            visitor_event_id: event_id,
            file_id,
            face_crop_path: crop.crop_path.clone(),
            thumbnail_path: crop.thumbnail_path.clone(),
            bounding_box: detection.bounding_box,
            confidence: detection.confidence,
            quality_score,
            embedding_data: embedding.as_slice().to_vec(),
            description: detection.description.clone(),
            merged_from: detection.merged_from,
        };

        // Unstored files are swept when the event closes.
        let face_id = self.store.insert_face(new_face).await?;
        run.release(&[&crop.crop_path, &crop.thumbnail_path]);

        let eligible = self.recognition.auto_assign
            && embedding.method != EmbeddingMethod::HashFallback
            && detection.confidence >= self.recognition.confidence_threshold * 100.0;

        let found = if eligible {
            match self.match_face(face_id, &embedding).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(event_id, face_id, error = %e, "Identity matching failed");
                    None
                }
            }
        } else {
            None
        };

        if let Some(found) = found {
            tracing::info!(
                event_id,
                face_id,
                person_id = found.person_id,
                similarity = found.similarity,
                "Face recognized"
            );
            self.notifier.notify(FaceNotification::FaceRecognized {
                event_id,
                face_id,
                person_id: found.person_id,
                person_name: found.person_name,
                confidence: detection.confidence,
                similarity: found.similarity,
            });
            return Ok(FaceOutcome::Recognized);
        }

        self.notifier.notify(FaceNotification::UnknownFaceDetected {
            event_id,
            face_id,
            confidence: detection.confidence,
            quality_score,
            thumbnail_path: crop.thumbnail_path.display().to_string(),
        });
        Ok(FaceOutcome::PendingLabel)
    }

    /// Assign a stored face to its best labeled match, if any.
    async fn match_face(
        &self,
        face_id: i64,
        embedding: &FaceEmbedding,
    ) -> FaceResult<Option<IdentityMatch>> {
        let labeled = self.store.labeled_embeddings().await?;
        let found = match self.matcher.find_best(embedding.as_slice(), &labeled) {
            Some(found) => found,
            None => return Ok(None),
        };

        self.store
            .assign_face(
                face_id,
                found.person_id,
                Assignment::Automatic {
                    similarity: found.similarity,
                },
            )
            .await?;

        if let Err(e) = self.store.refresh_person_stats(found.person_id).await {
            tracing::warn!(person_id = found.person_id, error = %e, "Failed to refresh person stats");
        }
        Ok(Some(found))
    }

    fn notify_complete(&self, summary: &EventSummary) {
        self.notifier.notify(FaceNotification::FaceProcessingComplete {
            event_id: summary.event_id,
            faces_detected: summary.faces_detected,
            faces_processed: summary.faces_processed,
            merged_duplicates: summary.merged_duplicates,
        });
    }

    /// Manually label a face. Stats are refreshed for both the new and the
    /// previous owner.
    pub async fn assign_face(&self, face_id: i64, person_id: i64) -> FaceResult<()> {
        let previous = self
            .store
            .assign_face(face_id, person_id, Assignment::Manual)
            .await?;
        self.store.refresh_person_stats(person_id).await?;
        if let Some(previous) = previous.filter(|&p| p != person_id) {
            self.store.refresh_person_stats(previous).await?;
        }

        tracing::info!(face_id, person_id, previous = ?previous, "Face manually assigned");
        Ok(())
    }

    /// Attribute a whole visitor event to a person.
    pub async fn label_event(&self, event_id: i64, person_id: i64, confidence: f32) -> FaceResult<()> {
        self.store.label_event(event_id, person_id, confidence).await?;
        tracing::info!(event_id, person_id, confidence, "Visitor event labeled");
        Ok(())
    }

    /// Enroll reference images for a person. The first face the provider
    /// reports in each image becomes a reference embedding; images without
    /// a face, or whose embedding fails, are skipped. Returns how many were
    /// stored.
    pub async fn train_person(&self, person_id: i64, image_urls: &[String]) -> FaceResult<usize> {
        if !self.recognition.enabled {
            return Err(FaceError::RecognitionDisabled);
        }
        if self.store.get_person(person_id).await?.is_none() {
            return Err(FaceError::PersonNotFound(person_id));
        }

        let mut stored = 0;
        for image_url in image_urls {
            let image = self.images.load(image_url).await?;
            let detections = self.provider.detect_faces(&image).await?;
            let face = match detections.first() {
                Some(face) => face,
                None => {
                    tracing::warn!(person_id, image_url = %image_url, "No face in training image");
                    continue;
                }
            };

            let embedding = match self.embedder.generate(Path::new(image_url), &face.description) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(person_id, image_url = %image_url, error = %e, "Skipping training image");
                    continue;
                }
            };

            self.store
                .add_encoding(NewEncoding {
                    person_id,
                    embedding_data: embedding.as_slice().to_vec(),
                    confidence: face.confidence,
                    image_path: image_url.clone(),
                })
                .await?;
            stored += 1;
        }

        tracing::info!(person_id, images = image_urls.len(), stored, "Training completed");
        Ok(stored)
    }

    /// Delete a face record and, best-effort, its files.
    pub async fn delete_face(&self, face_id: i64) -> FaceResult<()> {
        let record = self.store.delete_face(face_id).await?;
        self.cropper
            .remove_files(&record.face_crop_path, &record.thumbnail_path);

        if let Some(person_id) = record.person_id {
            if let Err(e) = self.store.refresh_person_stats(person_id).await {
                tracing::warn!(face_id, person_id, error = %e, "Failed to refresh person stats");
            }
        }

        tracing::info!(face_id, event_id = record.visitor_event_id, "Face deleted");
        Ok(())
    }

    /// Apply the configured retention to stored crops and thumbnails.
    pub async fn cleanup_old_files(&self) -> usize {
        let cropper = self.cropper.clone();
        let days = self.storage.cleanup_after_days;
        tokio::task::spawn_blocking(move || cropper.cleanup_older_than(days))
            .await
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler for FacePipeline {
    async fn handle(&self, job: &ProcessingJob) -> FaceResult<()> {
        self.process_event(job).await.map(|_| ())
    }

    /// The event is still marked processed so it is not picked up again.
    async fn on_failure(&self, job: &ProcessingJob, error: &FaceError) {
        let orphans = self.ledger.close(job.event_id);
        self.discard(job.event_id, orphans);

        if let Err(e) = self.store.mark_event_processed(job.event_id, 0).await {
            tracing::error!(event_id = job.event_id, error = %e, "Failed to mark event processed");
        }
        self.notifier.notify(FaceNotification::FaceProcessingError {
            event_id: job.event_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::image_source::SourceImage;
    use crate::collab::notify::ChannelNotifier;
    use crate::collab::provider::ReplayProvider;
    use crate::collab::store::{EventLabel, FaceRecord, MemoryFaceStore, Person};
    use crate::faces::crop::DirectoryLayout;
    use crate::faces::matcher::LabeledEmbedding;
    use crate::faces::queue::ProcessingQueue;
    use crate::faces::embedding::{EmbeddingMethod, FaceEmbedding};
    use crate::faces::types::{BoundingBox, FaceState};
    use image::{DynamicImage, RgbImage};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct FixedImage;

    #[async_trait]
    impl ImageSource for FixedImage {
        async fn load(&self, image_url: &str) -> FaceResult<SourceImage> {
            SourceImage::new(image_url, DynamicImage::ImageRgb8(RgbImage::new(640, 480)))
        }
    }

    struct BrokenEmbedder;

    impl EmbeddingGenerator for BrokenEmbedder {
        fn generate(&self, _crop_path: &Path, _description: &str) -> FaceResult<FaceEmbedding> {
            Err(FaceError::Embedding("model unavailable".to_string()))
        }
    }

    /// Wraps the memory store with a slow insert or a failing lookup.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryFaceStore,
        insert_delay: Option<Duration>,
        fail_lookup: bool,
    }

    #[async_trait]
    impl FaceStore for FlakyStore {
        async fn create_person(&self, name: &str) -> FaceResult<i64> {
            self.inner.create_person(name).await
        }

        async fn get_person(&self, person_id: i64) -> FaceResult<Option<Person>> {
            self.inner.get_person(person_id).await
        }

        async fn insert_face(&self, face: NewFace) -> FaceResult<i64> {
            if let Some(delay) = self.insert_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.insert_face(face).await
        }

        async fn get_face(&self, face_id: i64) -> FaceResult<Option<FaceRecord>> {
            self.inner.get_face(face_id).await
        }

        async fn labeled_embeddings(&self) -> FaceResult<Vec<LabeledEmbedding>> {
            if self.fail_lookup {
                return Err(FaceError::Store("connection reset".to_string()));
            }
            self.inner.labeled_embeddings().await
        }

        async fn assign_face(
            &self,
            face_id: i64,
            person_id: i64,
            assignment: Assignment,
        ) -> FaceResult<Option<i64>> {
            self.inner.assign_face(face_id, person_id, assignment).await
        }

        async fn delete_face(&self, face_id: i64) -> FaceResult<FaceRecord> {
            self.inner.delete_face(face_id).await
        }

        async fn mark_event_processed(&self, event_id: i64, faces_detected: usize) -> FaceResult<()> {
            self.inner.mark_event_processed(event_id, faces_detected).await
        }

        async fn refresh_person_stats(&self, person_id: i64) -> FaceResult<()> {
            self.inner.refresh_person_stats(person_id).await
        }

        async fn label_event(&self, event_id: i64, person_id: i64, confidence: f32) -> FaceResult<()> {
            self.inner.label_event(event_id, person_id, confidence).await
        }

        async fn event_label(&self, event_id: i64) -> FaceResult<Option<EventLabel>> {
            self.inner.event_label(event_id).await
        }

        async fn add_encoding(&self, encoding: NewEncoding) -> FaceResult<i64> {
            self.inner.add_encoding(encoding).await
        }
    }

    struct Harness<S = MemoryFaceStore> {
        pipeline: FacePipeline,
        store: Arc<S>,
        rx: UnboundedReceiver<FaceNotification>,
        config: Config,
        _dir: tempfile::TempDir,
    }

    fn harness(detections: Vec<Detection>, tweak: impl FnOnce(&mut Config)) -> Harness {
        harness_with(MemoryFaceStore::new(), detections, tweak)
    }

    fn harness_with<S: FaceStore + 'static>(
        store: S,
        detections: Vec<Detection>,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness<S> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.base_dir = dir.path().to_path_buf();
        tweak(&mut config);

        let store = Arc::new(store);
        let (notifier, rx) = ChannelNotifier::new();
        let pipeline = FacePipeline::new(
            &config,
            Collaborators {
                provider: Arc::new(ReplayProvider::new(detections)),
                images: Arc::new(FixedImage),
                store: store.clone(),
                notifier: Arc::new(notifier),
                layout: Arc::new(DirectoryLayout::new(&config.storage)),
            },
        );

        Harness {
            pipeline,
            store,
            rx,
            config,
            _dir: dir,
        }
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    fn drain(rx: &mut UnboundedReceiver<FaceNotification>) -> Vec<FaceNotification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn face(id: &str, bbox: BoundingBox, confidence: f32) -> Detection {
        Detection::new(id, bbox, confidence).with_description("adult male with glasses")
    }

    #[tokio::test]
    async fn test_duplicates_merge_into_one_record() {
        let mut h = harness(
            vec![
                face("a", BoundingBox::new(45.0, 30.0, 15.0, 20.0), 80.0),
                face("b", BoundingBox::new(45.2, 30.1, 15.1, 20.1), 92.0),
            ],
            |_| {},
        );

        let summary = h.pipeline.process_event(&ProcessingJob::new(1, "/uploads/a.jpg")).await.unwrap();
        assert_eq!(summary.faces_detected, 2);
        assert_eq!(summary.faces_processed, 1);
        assert_eq!(summary.merged_duplicates, 1);

        let faces = h.store.faces_for_event(1).await;
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].confidence, 92.0);
        assert_eq!(faces[0].merged_from, 2);
        assert_eq!(faces[0].embedding_data.len(), 32);
        assert!(faces[0].face_crop_path.exists());
        assert!(faces[0].file_id.starts_with("1_face_1_"));
        assert_eq!(h.store.processed_event(1).await, Some(1));

        let notes = drain(&mut h.rx);
        assert_eq!(notes[0].kind(), "unknown_face_detected");
        assert_eq!(
            notes.last().unwrap(),
            &FaceNotification::FaceProcessingComplete {
                event_id: 1,
                faces_detected: 2,
                faces_processed: 1,
                merged_duplicates: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_zero_detections() {
        let mut h = harness(Vec::new(), |_| {});
        let summary = h.pipeline.process_event(&ProcessingJob::new(3, "x.jpg")).await.unwrap();

        assert_eq!(summary.faces_detected, 0);
        assert_eq!(h.store.processed_event(3).await, Some(0));
        let notes = drain(&mut h.rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind(), "face_processing_complete");
    }

    #[tokio::test]
    async fn test_recognition_disabled_is_noop() {
        let mut h = harness(vec![face("a", BoundingBox::new(10.0, 10.0, 20.0, 20.0), 90.0)], |c| {
            c.recognition.enabled = false;
        });
        let summary = h.pipeline.process_event(&ProcessingJob::new(4, "x.jpg")).await.unwrap();

        assert!(summary.skipped);
        assert_eq!(h.store.count_faces().await, 0);
        assert_eq!(h.store.processed_event(4).await, Some(0));
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn test_auto_assignment_against_labeled_face() {
        let mut h = harness(vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 95.0)], |_| {});
        let alice = h.store.create_person("Alice").await.unwrap();

        // First sighting is unknown; label it by hand.
        h.pipeline.process_event(&ProcessingJob::new(1, "a.jpg")).await.unwrap();
        let first = h.store.faces_for_event(1).await[0].id;
        h.pipeline.assign_face(first, alice).await.unwrap();
        drain(&mut h.rx);

        // Same description, so the embeddings differ only in the noise tail.
        let summary = h.pipeline.process_event(&ProcessingJob::new(2, "b.jpg")).await.unwrap();
        assert_eq!(summary.recognized, 1);

        let second = &h.store.faces_for_event(2).await[0];
        assert_eq!(second.person_id, Some(alice));
        assert_eq!(second.state(), FaceState::AutoAssigned);

        let person = h.store.get_person(alice).await.unwrap().unwrap();
        assert_eq!(person.face_count, 2);

        let notes = drain(&mut h.rx);
        match &notes[0] {
            FaceNotification::FaceRecognized { person_name, similarity, .. } => {
                assert_eq!(person_name, "Alice");
                assert!(*similarity >= 0.6);
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_low_confidence_skips_matching() {
        let h = harness(vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 50.0)], |_| {});
        let alice = h.store.create_person("Alice").await.unwrap();

        h.pipeline.process_event(&ProcessingJob::new(1, "a.jpg")).await.unwrap();
        let first = h.store.faces_for_event(1).await[0].id;
        h.pipeline.assign_face(first, alice).await.unwrap();

        // 50 < 0.6 * 100: straight to manual labeling.
        let summary = h.pipeline.process_event(&ProcessingJob::new(2, "b.jpg")).await.unwrap();
        assert_eq!(summary.recognized, 0);
        assert_eq!(summary.pending_label, 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_uses_hash_placeholder() {
        let h = harness(vec![face("a", BoundingBox::new(0.1, 0.1, 0.2, 0.2), 90.0)], |_| {});
        let pipeline = h.pipeline.with_embedder(Arc::new(BrokenEmbedder));

        pipeline.process_event(&ProcessingJob::new(8, "/uploads/e.jpg")).await.unwrap();
        let stored = &h.store.faces_for_event(8).await[0];

        let detection = Detection {
            bounding_box: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            ..face("a", BoundingBox::new(0.0, 0.0, 0.0, 0.0), 90.0)
        };
        let expected = FaceEmbedding::hashed("/uploads/e.jpg", &serde_json::to_string(&detection).unwrap());
        assert_eq!(expected.method, EmbeddingMethod::HashFallback);
        assert_eq!(stored.embedding_data, expected.values.to_vec());
    }

    #[tokio::test]
    async fn test_hash_placeholders_are_never_auto_matched() {
        let mut h = harness(vec![face("a", BoundingBox::new(30.0, 30.0, 20.0, 20.0), 90.0)], |_| {});
        let pipeline = h.pipeline.with_embedder(Arc::new(BrokenEmbedder));
        let alice = h.store.create_person("Alice").await.unwrap();

        pipeline.process_event(&ProcessingJob::new(1, "/uploads/e.jpg")).await.unwrap();
        let first = h.store.faces_for_event(1).await[0].clone();
        pipeline.assign_face(first.id, alice).await.unwrap();
        drain(&mut h.rx);

        // Same image and detection: the placeholders are identical.
        let summary = pipeline.process_event(&ProcessingJob::new(2, "/uploads/e.jpg")).await.unwrap();
        let second = &h.store.faces_for_event(2).await[0];
        assert_eq!(second.embedding_data, first.embedding_data);

        assert_eq!(summary.recognized, 0);
        assert_eq!(summary.pending_label, 1);
        assert_eq!(second.person_id, None);
        assert_eq!(drain(&mut h.rx)[0].kind(), "unknown_face_detected");
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_face_pending() {
        let store = FlakyStore {
            fail_lookup: true,
            ..Default::default()
        };
        let mut h = harness_with(store, vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 95.0)], |_| {});

        let summary = h.pipeline.process_event(&ProcessingJob::new(5, "a.jpg")).await.unwrap();
        assert_eq!(summary.faces_processed, 1);
        assert_eq!(summary.pending_label, 1);
        assert_eq!(h.store.inner.processed_event(5).await, Some(1));
        assert_eq!(h.store.inner.faces_for_event(5).await.len(), 1);

        let kinds: Vec<&str> = drain(&mut h.rx).iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec!["unknown_face_detected", "face_processing_complete"]);
    }

    #[tokio::test]
    async fn test_abandoned_job_leaves_no_crop_files() {
        let store = FlakyStore {
            insert_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut h = harness_with(store, vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 95.0)], |_| {});
        let faces_dir = h.config.storage.faces_dir();
        let thumbnails_dir = h.config.storage.thumbnails_dir();

        let pipeline = Arc::new(h.pipeline);
        let queue = ProcessingQueue::new(pipeline.clone(), Duration::ZERO, Some(Duration::from_millis(300)));
        queue.enqueue(1, "a.jpg").unwrap();
        let stats = queue.shutdown().await;

        assert_eq!(stats.timed_out, 1);
        assert_eq!(h.store.inner.count_faces().await, 0);
        assert_eq!(file_count(&faces_dir), 0);
        assert_eq!(file_count(&thumbnails_dir), 0);
        assert_eq!(pipeline.ledger.open_runs(), 0);

        assert_eq!(h.store.inner.processed_event(1).await, Some(0));
        assert_eq!(drain(&mut h.rx).last().unwrap().kind(), "face_processing_error");
    }

    #[tokio::test]
    async fn test_label_event_upserts() {
        let h = harness(Vec::new(), |_| {});
        let alice = h.store.create_person("Alice").await.unwrap();
        let bob = h.store.create_person("Bob").await.unwrap();

        h.pipeline.label_event(11, alice, 0.8).await.unwrap();
        h.pipeline.label_event(11, bob, 0.9).await.unwrap();

        let label = h.store.event_label(11).await.unwrap().unwrap();
        assert_eq!(label.person_id, bob);
        assert_eq!(label.confidence, 0.9);
        assert!(matches!(
            h.pipeline.label_event(11, 77, 1.0).await,
            Err(FaceError::PersonNotFound(77))
        ));
    }

    #[tokio::test]
    async fn test_trained_person_is_recognized() {
        let mut h = harness(vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 95.0)], |_| {});
        let bob = h.store.create_person("Bob").await.unwrap();

        let urls = vec!["/uploads/bob_1.jpg".to_string(), "/uploads/bob_2.jpg".to_string()];
        assert_eq!(h.pipeline.train_person(bob, &urls).await.unwrap(), 2);
        assert_eq!(h.store.labeled_embeddings().await.unwrap().len(), 2);

        let summary = h.pipeline.process_event(&ProcessingJob::new(1, "door.jpg")).await.unwrap();
        assert_eq!(summary.recognized, 1);
        assert_eq!(h.store.faces_for_event(1).await[0].person_id, Some(bob));
        assert!(matches!(
            &drain(&mut h.rx)[0],
            FaceNotification::FaceRecognized { person_name, .. } if person_name == "Bob"
        ));

        assert!(matches!(
            h.pipeline.train_person(99, &urls).await,
            Err(FaceError::PersonNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_training_requires_recognition() {
        let h = harness(Vec::new(), |c| c.recognition.enabled = false);
        let bob = h.store.create_person("Bob").await.unwrap();
        assert!(matches!(
            h.pipeline.train_person(bob, &["x.jpg".to_string()]).await,
            Err(FaceError::RecognitionDisabled)
        ));
    }

    #[tokio::test]
    async fn test_training_skips_images_without_faces() {
        let h = harness(Vec::new(), |_| {});
        let bob = h.store.create_person("Bob").await.unwrap();
        assert_eq!(h.pipeline.train_person(bob, &["x.jpg".to_string()]).await.unwrap(), 0);
        assert!(h.store.labeled_embeddings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_face_removes_files_and_refreshes_stats() {
        let h = harness(vec![face("a", BoundingBox::new(40.0, 30.0, 20.0, 25.0), 95.0)], |_| {});
        let alice = h.store.create_person("Alice").await.unwrap();
        h.pipeline.process_event(&ProcessingJob::new(1, "a.jpg")).await.unwrap();

        let record = h.store.faces_for_event(1).await[0].clone();
        h.pipeline.assign_face(record.id, alice).await.unwrap();
        assert_eq!(h.store.get_person(alice).await.unwrap().unwrap().face_count, 1);

        h.pipeline.delete_face(record.id).await.unwrap();
        assert!(!record.face_crop_path.exists());
        assert!(!record.thumbnail_path.exists());
        assert_eq!(h.store.get_person(alice).await.unwrap().unwrap().face_count, 0);
        assert!(matches!(
            h.pipeline.delete_face(record.id).await,
            Err(FaceError::FaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_marks_event_and_notifies() {
        let mut h = harness(Vec::new(), |_| {});
        let job = ProcessingJob::new(6, "x.jpg");
        let error = FaceError::ImageLoad {
            url: "x.jpg".to_string(),
            reason: "gone".to_string(),
        };

        h.pipeline.on_failure(&job, &error).await;

        assert_eq!(h.store.processed_event(6).await, Some(0));
        let notes = drain(&mut h.rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind(), "face_processing_error");
    }
}
