use serde::Serialize;

/// Cosine similarity of two equal-length vectors.
///
/// Returns 0 for mismatched lengths, empty input or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// An embedding of a face that already belongs to a person.
#[derive(Debug, Clone)]
pub struct LabeledEmbedding {
    pub person_id: i64,
    pub person_name: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMatch {
    pub person_id: i64,
    pub person_name: String,
    pub similarity: f32,
}

/// Best-match lookup over labeled faces.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    threshold: f32,
}

impl IdentityMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Highest similarity at or above the threshold; the earliest candidate
    /// wins ties. `None` routes the face to manual labeling.
    pub fn find_best(&self, candidate: &[f32], labeled: &[LabeledEmbedding]) -> Option<IdentityMatch> {
        let mut best: Option<(&LabeledEmbedding, f32)> = None;

        for known in labeled {
            let similarity = cosine_similarity(candidate, &known.embedding);
            if similarity < self.threshold {
                continue;
            }
            match best {
                Some((_, best_similarity)) if similarity <= best_similarity => {}
                _ => best = Some((known, similarity)),
            }
        }

        best.map(|(known, similarity)| IdentityMatch {
            person_id: known.person_id,
            person_name: known.person_name.clone(),
            similarity,
        })
    }
}
