use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity id. Assigned monotonically at enrollment, never reused
/// until the whole gallery is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Face bounding box in frame coordinates, with the detector's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Six-point eye contours: [outer corner, upper lid ×2, inner corner, lower lid ×2].
///
/// Fewer than six points per eye is tolerated; such an eye reads as open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeLandmarks {
    pub left_eye: Vec<(f32, f32)>,
    pub right_eye: Vec<(f32, f32)>,
}

/// One face handed over by the external face-analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub landmarks: Option<EyeLandmarks>,
}

/// Display class for a detection, consumed by the rendering side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColorClass {
    Match,
    Unknown,
    RecognizedNotLive,
}

/// Per-detection output of one processed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
    pub color: ColorClass,
    /// Best inner-product score against the gallery (0.0 when empty).
    pub confidence: f32,
    /// True when this detection wrote a new attendance row.
    pub newly_marked: bool,
}

/// L2 norm of a vector.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Return a unit-length copy of `values`.
///
/// A zero vector is returned unchanged.
pub fn normalized(values: &[f32]) -> Vec<f32> {
    let norm = l2_norm(values);
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in [-1, 1]. Zero-norm inputs yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = l2_norm(a) * l2_norm(b);
    if denom > 0.0 { dot(a, b) / denom } else { 0.0 }
}
