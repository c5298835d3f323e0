use serde::{Deserialize, Serialize};

/// Landmark slot of the left eye (image left) in a five-point set.
pub const LEFT_EYE: usize = 0;
/// Landmark slot of the right eye (image right) in a five-point set.
pub const RIGHT_EYE: usize = 1;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are pixels in the frame the detector was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map a box found on a downscaled frame back onto the source frame.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Left and right eye centres, if landmarks are present.
    pub fn eyes(&self) -> Option<((f32, f32), (f32, f32))> {
        self.landmarks.map(|lms| (lms[LEFT_EYE], lms[RIGHT_EYE]))
    }
}

/// Face embedding vector produced by the recognition model.
///
/// Serialized as a bare array so the store file holds plain vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance to another embedding of the same dimension.
    pub fn distance(&self, other: &Embedding) -> f32 {
        squared_distance(&self.values, &other.values).sqrt()
    }
}

/// Squared L2 distance over the shared prefix of two vectors.
pub(crate) fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// One enrolled identity.
///
/// `id` is the durable key; `label` is a display name taken from the
/// enrollment photo's file name and is not unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: i64,
    pub label: String,
    pub embedding: Embedding,
}
