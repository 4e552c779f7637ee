//! Blink-based liveness via eye aspect ratio (EAR).
//!
//! A printed photo never blinks. Each tracked identity carries its last EAR
//! reading; an open→closed transition marks it live for the rest of the
//! session.
//!
//! EAR for one eye with contour points p0..p5:
//!
//! ```text
//! EAR = (|p1 - p5| + |p2 - p4|) / (2 |p0 - p3|)
//! ```

use crate::types::EyeLandmarks;
use std::collections::HashMap;

/// Eye aspect ratio below which an eye counts as closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.21;

/// EAR reported for an eye that cannot be measured. Reads as open.
const OPEN_EAR: f32 = 1.0;

const EYE_POINTS: usize = 6;

/// Per-identity blink state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessState {
    pub last_ear: f32,
    pub blinked: bool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            last_ear: OPEN_EAR,
            blinked: false,
        }
    }
}

/// Coarse eye state derived from a [`LivenessState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Open,
    Closed,
    /// A blink has been seen. Terminal for the session.
    Live,
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// EAR for a single six-point eye contour.
///
/// Fewer than six points, or coincident corners, give [`OPEN_EAR`].
pub fn eye_aspect_ratio(eye: &[(f32, f32)]) -> f32 {
    if eye.len() < EYE_POINTS {
        return OPEN_EAR;
    }
    let a = distance(eye[1], eye[5]);
    let b = distance(eye[2], eye[4]);
    let c = distance(eye[0], eye[3]);
    if c == 0.0 {
        return OPEN_EAR;
    }
    (a + b) / (2.0 * c)
}

/// Mean EAR of both eyes, or `None` if any coordinate is not finite.
pub fn mean_ear(landmarks: &EyeLandmarks) -> Option<f32> {
    let finite = landmarks
        .left_eye
        .iter()
        .chain(landmarks.right_eye.iter())
        .all(|(x, y)| x.is_finite() && y.is_finite());
    if !finite {
        return None;
    }
    Some((eye_aspect_ratio(&landmarks.left_eye) + eye_aspect_ratio(&landmarks.right_eye)) / 2.0)
}

/// Tracks blink liveness for a fixed set of names over one session.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    ear_threshold: f32,
    states: HashMap<String, LivenessState>,
}

impl LivenessTracker {
    pub fn new<I, S>(names: I, ear_threshold: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = names
            .into_iter()
            .map(|n| (n.into(), LivenessState::default()))
            .collect();
        Self {
            ear_threshold,
            states,
        }
    }

    pub fn ear_threshold(&self) -> f32 {
        self.ear_threshold
    }

    /// Start tracking `name` if it is not tracked yet.
    pub fn track(&mut self, name: &str) {
        self.states.entry(name.to_string()).or_default();
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<LivenessState> {
        self.states.get(name).copied()
    }

    pub fn eye_state(&self, name: &str) -> Option<EyeState> {
        let s = self.states.get(name)?;
        Some(if s.blinked {
            EyeState::Live
        } else if s.last_ear > self.ear_threshold {
            EyeState::Open
        } else {
            EyeState::Closed
        })
    }

    /// Feed one frame of eye landmarks for `name`.
    ///
    /// Untracked names, missing landmarks and non-finite coordinates are
    /// ignored. Returns true if this frame completed a blink.
    pub fn update(&mut self, name: &str, landmarks: Option<&EyeLandmarks>) -> bool {
        let Some(state) = self.states.get_mut(name) else {
            return false;
        };
        let Some(ear) = landmarks.and_then(mean_ear) else {
            return false;
        };

        let was_open = state.last_ear > self.ear_threshold;
        let is_closed = ear < self.ear_threshold;
        state.last_ear = ear;

        if was_open && is_closed {
            let first = !state.blinked;
            state.blinked = true;
            tracing::info!(name, ear, first, "blink detected");
            return true;
        }
        false
    }

    /// True once a blink has been seen for `name` this session.
    pub fn is_live(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(|s| s.blinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Symmetric eye whose EAR is exactly `ear` (corner distance 1.0).
    fn eye(ear: f32) -> Vec<(f32, f32)> {
        let h = ear / 2.0;
        vec![
            (0.0, 0.0),
            (0.33, h),
            (0.66, h),
            (1.0, 0.0),
            (0.66, -h),
            (0.33, -h),
        ]
    }

    fn landmarks(ear: f32) -> EyeLandmarks {
        EyeLandmarks {
            left_eye: eye(ear),
            right_eye: eye(ear),
        }
    }

    fn feed(tracker: &mut LivenessTracker, name: &str, ears: &[f32]) -> usize {
        ears.iter()
            .filter(|&&e| tracker.update(name, Some(&landmarks(e))))
            .count()
    }

    #[test]
    fn test_ear_geometry() {
        assert!((eye_aspect_ratio(&eye(0.30)) - 0.30).abs() < 1e-5);
        assert!((eye_aspect_ratio(&eye(0.15)) - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_ear_short_contour_is_open() {
        assert_eq!(eye_aspect_ratio(&[(0.0, 0.0), (1.0, 0.0)]), OPEN_EAR);
        assert_eq!(eye_aspect_ratio(&[]), OPEN_EAR);
    }

    #[test]
    fn test_ear_coincident_corners_is_open() {
        let pts = vec![(0.0, 0.0), (0.0, 1.0), (0.0, 1.0), (0.0, 0.0), (0.0, -1.0), (0.0, -1.0)];
        assert_eq!(eye_aspect_ratio(&pts), OPEN_EAR);
    }

    #[test]
    fn test_open_closed_open_is_one_blink() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        assert_eq!(feed(&mut tracker, "alice", &[0.30, 0.15, 0.30]), 1);
        assert!(tracker.is_live("alice"));
        assert_eq!(tracker.eye_state("alice"), Some(EyeState::Live));
    }

    #[test]
    fn test_eyes_always_open_never_live() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        assert_eq!(feed(&mut tracker, "alice", &[0.30, 0.28, 0.25, 0.31]), 0);
        assert!(!tracker.is_live("alice"));
        assert_eq!(tracker.eye_state("alice"), Some(EyeState::Open));
    }

    #[test]
    fn test_first_frame_closed_counts_as_blink() {
        // Initial last_ear is 1.0 (open)
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        assert!(tracker.update("alice", Some(&landmarks(0.10))));
    }

    #[test]
    fn test_staying_closed_is_not_another_blink() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        assert_eq!(feed(&mut tracker, "alice", &[0.30, 0.10, 0.10, 0.10]), 1);
    }

    #[test]
    fn test_liveness_is_sticky() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        feed(&mut tracker, "alice", &[0.30, 0.15, 0.30, 0.30, 0.35]);
        assert!(tracker.is_live("alice"));
    }

    #[test]
    fn test_short_contours_never_blink() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        let short = EyeLandmarks {
            left_eye: vec![(0.0, 0.0); 5],
            right_eye: vec![(0.0, 0.0); 3],
        };
        for _ in 0..5 {
            assert!(!tracker.update("alice", Some(&short)));
        }
        assert!(!tracker.is_live("alice"));
        assert_eq!(tracker.state("alice").unwrap().last_ear, OPEN_EAR);
    }

    #[test]
    fn test_missing_landmarks_is_noop() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        tracker.update("alice", Some(&landmarks(0.30)));
        let before = tracker.state("alice");
        assert!(!tracker.update("alice", None));
        assert_eq!(tracker.state("alice"), before);
    }

    #[test]
    fn test_non_finite_landmarks_is_noop() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        let mut bad = landmarks(0.10);
        bad.left_eye[2] = (f32::NAN, 0.0);
        assert!(!tracker.update("alice", Some(&bad)));
        assert_eq!(tracker.state("alice"), Some(LivenessState::default()));
    }

    #[test]
    fn test_untracked_name_is_ignored() {
        let mut tracker = LivenessTracker::new(["alice"], DEFAULT_EAR_THRESHOLD);
        assert!(!tracker.update("mallory", Some(&landmarks(0.10))));
        assert!(!tracker.is_tracked("mallory"));
        assert!(!tracker.is_live("mallory"));
    }

    #[test]
    fn test_identities_are_independent() {
        let mut tracker = LivenessTracker::new(["alice", "bob"], DEFAULT_EAR_THRESHOLD);
        feed(&mut tracker, "alice", &[0.30, 0.15]);
        feed(&mut tracker, "bob", &[0.30, 0.30]);
        assert!(tracker.is_live("alice"));
        assert!(!tracker.is_live("bob"));
    }

    #[test]
    fn test_track_adds_new_name_once() {
        let mut tracker = LivenessTracker::new(Vec::<String>::new(), DEFAULT_EAR_THRESHOLD);
        tracker.track("carol");
        feed(&mut tracker, "carol", &[0.15]);
        tracker.track("carol");
        assert!(tracker.is_live("carol"));
    }
}
