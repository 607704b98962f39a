//! Persistence seam for faces and people.
//!
//! The pipeline only talks to [`FaceStore`]; [`MemoryFaceStore`] backs the
//! CLI and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::error::{FaceError, FaceResult};
use crate::faces::matcher::LabeledEmbedding;
use crate::faces::types::{BoundingBox, FaceState};

/// A face ready to be persisted.
#[derive(Debug, Clone, Serialize)]
pub struct NewFace {
    pub visitor_event_id: i64,
    /// File stem shared by the crop and thumbnail.
    pub file_id: String,
    pub face_crop_path: PathBuf,
    pub thumbnail_path: PathBuf,
    /// Top-left percentage box.
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub quality_score: f32,
    pub embedding_data: Vec<f32>,
    pub description: String,
    pub merged_from: usize,
}

/// A persisted face.
#[derive(Debug, Clone, Serialize)]
pub struct FaceRecord {
    pub id: i64,
    pub visitor_event_id: i64,
    pub file_id: String,
    pub face_crop_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub quality_score: f32,
    pub embedding_data: Vec<f32>,
    pub description: String,
    pub merged_from: usize,
    pub person_id: Option<i64>,
    pub assigned_manually: bool,
    pub created_at: DateTime<Utc>,
}

impl FaceRecord {
    pub fn state(&self) -> FaceState {
        match (self.person_id, self.assigned_manually) {
            (Some(_), true) => FaceState::ManualReassigned,
            (Some(_), false) => FaceState::AutoAssigned,
            (None, _) => FaceState::PendingLabel,
        }
    }
}

/// A named identity and its aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub face_count: usize,
    pub avg_confidence: f32,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Assignment {
    Automatic { similarity: f32 },
    Manual,
}

/// A person attributed to a whole visitor event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLabel {
    pub visitor_event_id: i64,
    pub person_id: i64,
    pub confidence: f32,
    pub labeled_at: DateTime<Utc>,
}

/// A reference embedding enrolled for a person outside any visitor event.
#[derive(Debug, Clone, Serialize)]
pub struct NewEncoding {
    pub person_id: i64,
    pub embedding_data: Vec<f32>,
    pub confidence: f32,
    pub image_path: String,
}

/// Audit trail entry for a manual reassignment.
#[derive(Debug, Clone, Serialize)]
pub struct MergeHistoryEntry {
    pub face_id: i64,
    pub from_person_id: Option<i64>,
    pub to_person_id: i64,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait FaceStore: Send + Sync {
    async fn create_person(&self, name: &str) -> FaceResult<i64>;

    async fn get_person(&self, person_id: i64) -> FaceResult<Option<Person>>;

    async fn insert_face(&self, face: NewFace) -> FaceResult<i64>;

    async fn get_face(&self, face_id: i64) -> FaceResult<Option<FaceRecord>>;

    /// Embeddings of every face that has an owner, oldest face first,
    /// followed by enrolled reference embeddings.
    async fn labeled_embeddings(&self) -> FaceResult<Vec<LabeledEmbedding>>;

    /// Point a face at a person. Returns the previous owner.
    async fn assign_face(
        &self,
        face_id: i64,
        person_id: i64,
        assignment: Assignment,
    ) -> FaceResult<Option<i64>>;

    /// Remove a face and return what was stored.
    async fn delete_face(&self, face_id: i64) -> FaceResult<FaceRecord>;

    async fn mark_event_processed(&self, event_id: i64, faces_detected: usize) -> FaceResult<()>;

    /// Recompute face count, average confidence and first/last seen.
    async fn refresh_person_stats(&self, person_id: i64) -> FaceResult<()>;

    /// Link a visitor event to a person, replacing any earlier link.
    async fn label_event(&self, event_id: i64, person_id: i64, confidence: f32) -> FaceResult<()>;

    async fn event_label(&self, event_id: i64) -> FaceResult<Option<EventLabel>>;

    /// Enroll a reference embedding; returns its id.
    async fn add_encoding(&self, encoding: NewEncoding) -> FaceResult<i64>;
}

#[derive(Default)]
struct MemoryState {
    next_face_id: i64,
    next_person_id: i64,
    faces: BTreeMap<i64, FaceRecord>,
    people: BTreeMap<i64, Person>,
    processed_events: HashMap<i64, usize>,
    merge_history: Vec<MergeHistoryEntry>,
    event_labels: HashMap<i64, EventLabel>,
    next_encoding_id: i64,
    encodings: BTreeMap<i64, NewEncoding>,
}

/// In-process store; ids start at 1.
#[derive(Default)]
pub struct MemoryFaceStore {
    state: RwLock<MemoryState>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Face count recorded for a processed event.
    pub async fn processed_event(&self, event_id: i64) -> Option<usize> {
        self.state.read().await.processed_events.get(&event_id).copied()
    }

    pub async fn faces_for_event(&self, event_id: i64) -> Vec<FaceRecord> {
        self.state
            .read()
            .await
            .faces
            .values()
            .filter(|f| f.visitor_event_id == event_id)
            .cloned()
            .collect()
    }

    pub async fn merge_history(&self) -> Vec<MergeHistoryEntry> {
        self.state.read().await.merge_history.clone()
    }

    pub async fn count_faces(&self) -> usize {
        self.state.read().await.faces.len()
    }
}

#[async_trait]
impl FaceStore for MemoryFaceStore {
    async fn create_person(&self, name: &str) -> FaceResult<i64> {
        let mut state = self.state.write().await;
        state.next_person_id += 1;
        let id = state.next_person_id;
        state.people.insert(
            id,
            Person {
                id,
                name: name.to_string(),
                face_count: 0,
                avg_confidence: 0.0,
                first_seen: None,
                last_seen: None,
            },
        );
        Ok(id)
    }

    async fn get_person(&self, person_id: i64) -> FaceResult<Option<Person>> {
        Ok(self.state.read().await.people.get(&person_id).cloned())
    }

    async fn insert_face(&self, face: NewFace) -> FaceResult<i64> {
        let mut state = self.state.write().await;
        state.next_face_id += 1;
        let id = state.next_face_id;
        state.faces.insert(
            id,
            FaceRecord {
                id,
                visitor_event_id: face.visitor_event_id,
                file_id: face.file_id,
                face_crop_path: face.face_crop_path,
                thumbnail_path: face.thumbnail_path,
                bounding_box: face.bounding_box,
                confidence: face.confidence,
                quality_score: face.quality_score,
                embedding_data: face.embedding_data,
                description: face.description,
                merged_from: face.merged_from,
                person_id: None,
                assigned_manually: false,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get_face(&self, face_id: i64) -> FaceResult<Option<FaceRecord>> {
        Ok(self.state.read().await.faces.get(&face_id).cloned())
    }

    async fn labeled_embeddings(&self) -> FaceResult<Vec<LabeledEmbedding>> {
        let state = self.state.read().await;
        let owned = state
            .faces
            .values()
            .filter_map(|face| Some((face.person_id?, &face.embedding_data)));
        let enrolled = state
            .encodings
            .values()
            .map(|encoding| (encoding.person_id, &encoding.embedding_data));

        let labeled = owned
            .chain(enrolled)
            .filter_map(|(person_id, embedding)| {
                let person = state.people.get(&person_id)?;
                Some(LabeledEmbedding {
                    person_id: person.id,
                    person_name: person.name.clone(),
                    embedding: embedding.clone(),
                })
            })
            .collect();
        Ok(labeled)
    }

    async fn assign_face(
        &self,
        face_id: i64,
        person_id: i64,
        assignment: Assignment,
    ) -> FaceResult<Option<i64>> {
        let mut state = self.state.write().await;
        if !state.people.contains_key(&person_id) {
            return Err(FaceError::PersonNotFound(person_id));
        }

        let face = state
            .faces
            .get_mut(&face_id)
            .ok_or(FaceError::FaceNotFound(face_id))?;
        let previous = face.person_id.replace(person_id);
        face.assigned_manually = assignment == Assignment::Manual;

        if assignment == Assignment::Manual {
            state.merge_history.push(MergeHistoryEntry {
                face_id,
                from_person_id: previous,
                to_person_id: person_id,
                at: Utc::now(),
            });
        }

        Ok(previous)
    }

    async fn delete_face(&self, face_id: i64) -> FaceResult<FaceRecord> {
        self.state
            .write()
            .await
            .faces
            .remove(&face_id)
            .ok_or(FaceError::FaceNotFound(face_id))
    }

    async fn mark_event_processed(&self, event_id: i64, faces_detected: usize) -> FaceResult<()> {
        self.state
            .write()
            .await
            .processed_events
            .insert(event_id, faces_detected);
        Ok(())
    }

    async fn refresh_person_stats(&self, person_id: i64) -> FaceResult<()> {
        let mut state = self.state.write().await;

        let owned: Vec<(f32, DateTime<Utc>)> = state
            .faces
            .values()
            .filter(|f| f.person_id == Some(person_id))
            .map(|f| (f.confidence, f.created_at))
            .collect();

        let person = state
            .people
            .get_mut(&person_id)
            .ok_or(FaceError::PersonNotFound(person_id))?;

        person.face_count = owned.len();
        person.avg_confidence = if owned.is_empty() {
            0.0
        } else {
            owned.iter().map(|(c, _)| c).sum::<f32>() / owned.len() as f32
        };
        person.first_seen = owned.iter().map(|(_, t)| *t).min();
        person.last_seen = owned.iter().map(|(_, t)| *t).max();

        Ok(())
    }

    async fn label_event(&self, event_id: i64, person_id: i64, confidence: f32) -> FaceResult<()> {
        let mut state = self.state.write().await;
        if !state.people.contains_key(&person_id) {
            return Err(FaceError::PersonNotFound(person_id));
        }

        state.event_labels.insert(
            event_id,
            EventLabel {
                visitor_event_id: event_id,
                person_id,
                confidence,
                labeled_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn event_label(&self, event_id: i64) -> FaceResult<Option<EventLabel>> {
        Ok(self.state.read().await.event_labels.get(&event_id).cloned())
    }

    async fn add_encoding(&self, encoding: NewEncoding) -> FaceResult<i64> {
        let mut state = self.state.write().await;
        if !state.people.contains_key(&encoding.person_id) {
            return Err(FaceError::PersonNotFound(encoding.person_id));
        }

        state.next_encoding_id += 1;
        let id = state.next_encoding_id;
        state.encodings.insert(id, encoding);
        Ok(id)
    }
}
