use crate::gallery::{GalleryError, IdentityGallery};
use crate::types::IdentityId;

/// Match threshold calibrated for ArcFace w600k_r50 embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.50;

/// Outcome of identifying one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Matched {
        id: IdentityId,
        name: String,
        score: f32,
    },
    /// Best score was below threshold, or nothing is enrolled (score 0.0).
    Unmatched { score: f32 },
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Matched { .. })
    }

    pub fn score(&self) -> f32 {
        match self {
            Verdict::Matched { score, .. } | Verdict::Unmatched { score } => *score,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Verdict::Matched { name, .. } => Some(name),
            Verdict::Unmatched { .. } => None,
        }
    }
}

/// Strategy for resolving a probe embedding against the enrolled gallery.
///
/// Implementations must not mutate the gallery; `identify` may be called
/// concurrently from several threads.
pub trait Matcher {
    fn identify(&self, gallery: &IdentityGallery, probe: &[f32]) -> Result<Verdict, GalleryError>;
}

/// Nearest neighbor by inner product, accepted when the score reaches the threshold.
///
/// The threshold belongs to the embedding space: different upstream models
/// need different values.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdMatcher {
    pub threshold: f32,
}

impl ThresholdMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for ThresholdMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for ThresholdMatcher {
    fn identify(&self, gallery: &IdentityGallery, probe: &[f32]) -> Result<Verdict, GalleryError> {
        let Some(hit) = gallery.search(probe)? else {
            return Ok(Verdict::Unmatched { score: 0.0 });
        };

        match gallery.name(hit.id) {
            Some(name) if hit.score >= self.threshold => Ok(Verdict::Matched {
                id: hit.id,
                name: name.to_string(),
                score: hit.score,
            }),
            _ => Ok(Verdict::Unmatched { score: hit.score }),
        }
    }
}
