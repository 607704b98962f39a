//! Description-based pseudo-embeddings.
//!
//! No pixels are consulted: categorical features are pulled out of the
//! provider's free-text description and one-hot encoded. The
//! [`EmbeddingGenerator`] trait is the seam where a real face model would
//! plug in.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{FaceError, FaceResult};

pub const EMBEDDING_DIM: usize = 32;

const AGE_OFFSET: usize = 0;
const GENDER_OFFSET: usize = 4;
const ACCESSORY_OFFSET: usize = 6;
const HAIR_OFFSET: usize = 9;
const NOISE_OFFSET: usize = 14;
const NOISE_SCALE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Child,
    Young,
    Adult,
    Elderly,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HairColor {
    Blonde,
    Brown,
    Black,
    Red,
    Gray,
    #[default]
    Unknown,
}

/// Categorical features read from a face description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceFeatures {
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub has_glasses: bool,
    pub has_beard: bool,
    pub has_mustache: bool,
    pub hair_color: HairColor,
}

impl FaceFeatures {
    /// Case-insensitive keyword extraction. First match wins within a category.
    pub fn from_description(description: &str) -> Self {
        let desc = description.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| desc.contains(w));

        let age_group = if has(&["child", "kid"]) {
            AgeGroup::Child
        } else if has(&["teen", "young"]) {
            AgeGroup::Young
        } else if has(&["adult", "middle"]) {
            AgeGroup::Adult
        } else if has(&["elderly", "senior"]) {
            AgeGroup::Elderly
        } else {
            AgeGroup::Unknown
        };

        // "female" contains "male".
        let gender = if has(&["female"]) {
            Gender::Female
        } else if has(&["male"]) {
            Gender::Male
        } else {
            Gender::Unknown
        };

        let hair_color = if has(&["blonde", "blond"]) {
            HairColor::Blonde
        } else if has(&["brown"]) {
            HairColor::Brown
        } else if has(&["black"]) {
            HairColor::Black
        } else if has(&["red", "ginger"]) {
            HairColor::Red
        } else if has(&["gray", "grey"]) {
            HairColor::Gray
        } else {
            HairColor::Unknown
        };

        Self {
            age_group,
            gender,
            has_glasses: has(&["glasses", "spectacles"]),
            has_beard: has(&["beard"]),
            has_mustache: has(&["mustache", "moustache"]),
            hair_color,
        }
    }

    /// Fill the 14 categorical slots; the rest of `values` is left alone.
    fn encode_into(&self, values: &mut [f32; EMBEDDING_DIM]) {
        let age = match self.age_group {
            AgeGroup::Child => Some(0),
            AgeGroup::Young => Some(1),
            AgeGroup::Adult => Some(2),
            AgeGroup::Elderly => Some(3),
            AgeGroup::Unknown => None,
        };
        if let Some(i) = age {
            values[AGE_OFFSET + i] = 1.0;
        }

        match self.gender {
            Gender::Male => values[GENDER_OFFSET] = 1.0,
            Gender::Female => values[GENDER_OFFSET + 1] = 1.0,
            Gender::Unknown => {}
        }

        let flags = [self.has_glasses, self.has_beard, self.has_mustache];
        for (i, flag) in flags.into_iter().enumerate() {
            if flag {
                values[ACCESSORY_OFFSET + i] = 1.0;
            }
        }

        let hair = match self.hair_color {
            HairColor::Blonde => Some(0),
            HairColor::Brown => Some(1),
            HairColor::Black => Some(2),
            HairColor::Red => Some(3),
            HairColor::Gray => Some(4),
            HairColor::Unknown => None,
        };
        if let Some(i) = hair {
            values[HAIR_OFFSET + i] = 1.0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMethod {
    DescriptionBased,
    /// Placeholder derived from a hash; carries no identity information.
    HashFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub values: [f32; EMBEDDING_DIM],
    pub features: FaceFeatures,
    pub method: EmbeddingMethod,
}

impl FaceEmbedding {
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Deterministic placeholder from `(image_url, detection_json)`.
    pub fn hashed(image_url: &str, detection_json: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(detection_json.as_bytes());
        let digest = hasher.finalize();

        let mut values = [0.0f32; EMBEDDING_DIM];
        for (value, byte) in values.iter_mut().zip(digest.iter()) {
            *value = *byte as f32 / 255.0;
        }

        Self {
            values,
            features: FaceFeatures::default(),
            method: EmbeddingMethod::HashFallback,
        }
    }
}

/// Produces a fixed-length identity vector for one face.
pub trait EmbeddingGenerator: Send + Sync {
    fn generate(&self, crop_path: &Path, description: &str) -> FaceResult<FaceEmbedding>;
}

/// Keyword features plus a small random tail to break exact ties.
pub struct DescriptionEmbedder {
    rng: Mutex<StdRng>,
}

impl DescriptionEmbedder {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible random tail.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for DescriptionEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingGenerator for DescriptionEmbedder {
    fn generate(&self, _crop_path: &Path, description: &str) -> FaceResult<FaceEmbedding> {
        let features = FaceFeatures::from_description(description);

        let mut values = [0.0f32; EMBEDDING_DIM];
        features.encode_into(&mut values);

        let mut rng = self
            .rng
            .lock()
            .map_err(|e| FaceError::Embedding(format!("rng lock poisoned: {}", e)))?;
        for value in values.iter_mut().skip(NOISE_OFFSET) {
            *value = rng.gen_range(0.0..NOISE_SCALE);
        }

        Ok(FaceEmbedding {
            values,
            features,
            method: EmbeddingMethod::DescriptionBased,
        })
    }
}
