//! Per-frame attendance pipeline: match → liveness → ledger.

use crate::config::Config;
use crate::gallery::{GalleryError, IdentityGallery};
use crate::ledger::{AttendanceLedger, LedgerError};
use crate::liveness::LivenessTracker;
use crate::matcher::{Matcher, ThresholdMatcher, Verdict};
use crate::types::{Annotation, ColorClass, Detection, IdentityId};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("no face detected in enrollment frame")]
    NoFaceDetected,
    /// The frame was fully processed but at least one attendance row could
    /// not be written. `annotations` covers every detection; the affected
    /// names stay unmarked.
    #[error("attendance not recorded: {source}")]
    MarkFailed {
        annotations: Vec<Annotation>,
        #[source]
        source: LedgerError,
    },
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub enrolled: usize,
    pub orphaned: usize,
    pub marked_today: Vec<String>,
    pub live: usize,
    pub today: NaiveDate,
}

/// Pick the enrollment face: highest detector confidence, first on ties.
pub fn best_face(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, d| match best {
        Some(b) if b.bbox.confidence >= d.bbox.confidence => Some(b),
        _ => Some(d),
    })
}

/// One run of the attendance pipeline. Owns all mutable state.
pub struct AttendanceSession<M = ThresholdMatcher> {
    gallery: IdentityGallery,
    matcher: M,
    liveness: LivenessTracker,
    ledger: AttendanceLedger,
}

impl AttendanceSession<ThresholdMatcher> {
    /// Open gallery and ledger from `config`.
    pub fn open(config: &Config) -> Result<Self, SessionError> {
        let gallery = IdentityGallery::open(config.gallery_paths(), config.embedding_dim)?;
        let ledger = AttendanceLedger::open(config.ledger_path())?;
        Ok(Self::new(
            gallery,
            ThresholdMatcher::new(config.match_threshold),
            ledger,
            config.ear_threshold,
        ))
    }
}

impl<M: Matcher> AttendanceSession<M> {
    /// Liveness tracking starts for every name currently enrolled.
    pub fn new(
        gallery: IdentityGallery,
        matcher: M,
        ledger: AttendanceLedger,
        ear_threshold: f32,
    ) -> Self {
        let liveness = LivenessTracker::new(gallery.known_names(), ear_threshold);
        Self {
            gallery,
            matcher,
            liveness,
            ledger,
        }
    }

    pub fn gallery(&self) -> &IdentityGallery {
        &self.gallery
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Resolve one probe. A malformed embedding reads as unknown.
    pub fn identify(&self, embedding: &[f32]) -> Verdict {
        match self.matcher.identify(&self.gallery, embedding) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unusable embedding; treating as unknown");
                Verdict::Unmatched { score: 0.0 }
            }
        }
    }

    /// Run every detection of one frame through the pipeline.
    ///
    /// A ledger write failure does not stop the frame: remaining detections
    /// are still matched and tracked, and the first write error comes back
    /// as [`SessionError::MarkFailed`] together with all annotations.
    pub fn process_frame(
        &mut self,
        detections: &[Detection],
    ) -> Result<Vec<Annotation>, SessionError> {
        let mut annotations = Vec::with_capacity(detections.len());
        let mut mark_error = None;

        for det in detections {
            let verdict = self.identify(&det.embedding);
            let confidence = verdict.score();

            let Verdict::Matched { name, .. } = verdict else {
                annotations.push(Annotation {
                    bbox: det.bbox,
                    label: UNKNOWN_LABEL.to_string(),
                    color: ColorClass::Unknown,
                    confidence,
                    newly_marked: false,
                });
                continue;
            };

            self.liveness.update(&name, det.landmarks.as_ref());

            let annotation = if self.liveness.is_live(&name) {
                let newly_marked = match self.ledger.mark(&name) {
                    Ok(marked) => marked,
                    Err(e) => {
                        tracing::error!(name = %name, error = %e, "attendance write failed");
                        if mark_error.is_none() {
                            mark_error = Some(e);
                        }
                        false
                    }
                };
                Annotation {
                    bbox: det.bbox,
                    label: name,
                    color: ColorClass::Match,
                    confidence,
                    newly_marked,
                }
            } else {
                Annotation {
                    bbox: det.bbox,
                    label: format!("{name} (blink)"),
                    color: ColorClass::RecognizedNotLive,
                    confidence,
                    newly_marked: false,
                }
            };
            annotations.push(annotation);
        }

        tracing::trace!(faces = detections.len(), "frame processed");
        match mark_error {
            Some(source) => Err(SessionError::MarkFailed {
                annotations,
                source,
            }),
            None => Ok(annotations),
        }
    }

    /// Enroll the best face of `detections` under `name` and persist the gallery.
    ///
    /// If persisting fails nothing is enrolled and the error is returned.
    pub fn enroll(
        &mut self,
        name: &str,
        detections: &[Detection],
    ) -> Result<IdentityId, SessionError> {
        let face = best_face(detections).ok_or(SessionError::NoFaceDetected)?;
        tracing::info!(
            name,
            confidence = face.bbox.confidence,
            candidates = detections.len(),
            "enroll: best face selected"
        );
        let id = self.gallery.enroll_durable(name, &face.embedding)?;
        self.liveness.track(name);
        Ok(id)
    }

    pub fn status(&self) -> SessionStatus {
        let known = self.gallery.known_names();
        SessionStatus {
            enrolled: self.gallery.len(),
            orphaned: self.gallery.orphaned().len(),
            marked_today: self
                .ledger
                .marked_today()
                .into_iter()
                .map(str::to_string)
                .collect(),
            live: known.iter().filter(|n| self.liveness.is_live(n)).count(),
            today: self.ledger.today(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryPaths;
    use crate::types::{BoundingBox, EyeLandmarks};

    fn bbox(confidence: f32) -> BoundingBox {
        BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
            confidence,
        }
    }

    fn eyes(ear: f32) -> EyeLandmarks {
        let h = ear / 2.0;
        let eye = vec![(0.0, 0.0), (0.3, h), (0.6, h), (1.0, 0.0), (0.6, -h), (0.3, -h)];
        EyeLandmarks {
            left_eye: eye.clone(),
            right_eye: eye,
        }
    }

    fn det(embedding: &[f32], ear: Option<f32>) -> Detection {
        Detection {
            bbox: bbox(0.9),
            embedding: embedding.to_vec(),
            landmarks: ear.map(eyes),
        }
    }

    fn session(dir: &std::path::Path) -> AttendanceSession {
        let mut gallery = IdentityGallery::in_memory(3);
        gallery.enroll("alice", &[1.0, 0.0, 0.0]).unwrap();
        gallery.enroll("bob", &[0.0, 1.0, 0.0]).unwrap();
        let ledger = AttendanceLedger::open(dir.join("attendance.csv")).unwrap();
        AttendanceSession::new(gallery, ThresholdMatcher::new(0.5), ledger, 0.21)
    }

    #[test]
    fn test_best_face_picks_highest_confidence() {
        let mut a = det(&[1.0, 0.0, 0.0], None);
        a.bbox.confidence = 0.6;
        let mut b = det(&[0.0, 1.0, 0.0], None);
        b.bbox.confidence = 0.95;
        let mut c = det(&[0.0, 0.0, 1.0], None);
        c.bbox.confidence = 0.95;
        let dets = [a, b, c];
        assert_eq!(best_face(&dets).unwrap().embedding, vec![0.0, 1.0, 0.0]);
        assert!(best_face(&[]).is_none());
    }

    #[test]
    fn test_unknown_face_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let out = s.process_frame(&[det(&[0.0, 0.0, 1.0], Some(0.1))]).unwrap();
        assert_eq!(out[0].label, "Unknown");
        assert_eq!(out[0].color, ColorClass::Unknown);
        assert!(!out[0].newly_marked);
    }

    #[test]
    fn test_wrong_dimension_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let out = s.process_frame(&[det(&[1.0, 0.0], None)]).unwrap();
        assert_eq!(out[0].color, ColorClass::Unknown);
        assert_eq!(out[0].confidence, 0.0);
    }

    #[test]
    fn test_recognized_waits_for_blink_then_marks_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let alice = [0.9, 0.1, 0.0];

        let out = s.process_frame(&[det(&alice, Some(0.30))]).unwrap();
        assert_eq!(out[0].label, "alice (blink)");
        assert_eq!(out[0].color, ColorClass::RecognizedNotLive);

        let out = s.process_frame(&[det(&alice, Some(0.12))]).unwrap();
        assert_eq!(out[0].label, "alice");
        assert_eq!(out[0].color, ColorClass::Match);
        assert!(out[0].newly_marked);

        let out = s.process_frame(&[det(&alice, Some(0.30))]).unwrap();
        assert_eq!(out[0].color, ColorClass::Match);
        assert!(!out[0].newly_marked);
        assert_eq!(s.status().marked_today, vec!["alice"]);
    }

    #[test]
    fn test_missing_landmarks_never_marks() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        for _ in 0..3 {
            let out = s.process_frame(&[det(&[0.0, 1.0, 0.0], None)]).unwrap();
            assert_eq!(out[0].color, ColorClass::RecognizedNotLive);
        }
        assert!(s.ledger().marked_today().is_empty());
    }

    #[test]
    fn test_multiple_faces_in_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let out = s
            .process_frame(&[
                det(&[1.0, 0.0, 0.0], Some(0.1)),
                det(&[0.0, 1.0, 0.0], Some(0.3)),
                det(&[0.0, 0.0, 1.0], Some(0.1)),
            ])
            .unwrap();
        let colors: Vec<ColorClass> = out.iter().map(|a| a.color).collect();
        assert_eq!(
            colors,
            vec![ColorClass::Match, ColorClass::RecognizedNotLive, ColorClass::Unknown]
        );
    }

    #[test]
    fn test_enroll_starts_tracking_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let id = s.enroll("carol", &[det(&[0.0, 0.0, 1.0], None)]).unwrap();
        assert_eq!(id, IdentityId(2));
        assert!(s.liveness().is_tracked("carol"));

        let out = s.process_frame(&[det(&[0.0, 0.0, 1.0], Some(0.1))]).unwrap();
        assert_eq!(out[0].label, "carol");
        assert!(out[0].newly_marked);
    }

    #[test]
    fn test_enroll_without_faces_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        assert!(matches!(s.enroll("carol", &[]), Err(SessionError::NoFaceDetected)));
        assert_eq!(s.gallery().len(), 2);
    }

    #[test]
    fn test_status_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.process_frame(&[det(&[1.0, 0.0, 0.0], Some(0.1))]).unwrap();
        let st = s.status();
        assert_eq!(st.enrolled, 2);
        assert_eq!(st.orphaned, 0);
        assert_eq!(st.live, 1);
    }

    #[test]
    fn test_ledger_failure_still_annotates_whole_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let ledger_path = dir.path().join("attendance.csv");
        std::fs::remove_file(&ledger_path).unwrap();
        std::fs::create_dir(&ledger_path).unwrap();

        let frame = [
            det(&[1.0, 0.0, 0.0], Some(0.1)),
            det(&[0.0, 1.0, 0.0], Some(0.1)),
            det(&[0.0, 0.0, 1.0], Some(0.1)),
        ];
        let Err(SessionError::MarkFailed { annotations, .. }) = s.process_frame(&frame) else {
            panic!("expected MarkFailed");
        };
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[1].label, "bob");
        assert_eq!(annotations[1].color, ColorClass::Match);
        assert!(!annotations[1].newly_marked);
        assert_eq!(annotations[2].color, ColorClass::Unknown);
        assert!(s.liveness().is_live("bob"));
        assert!(s.ledger().marked_today().is_empty());

        // Once the file is writable again the same people get marked.
        std::fs::remove_dir(&ledger_path).unwrap();
        let out = s.process_frame(&frame[..2]).unwrap();
        assert!(out[0].newly_marked && out[1].newly_marked);
        assert_eq!(s.status().marked_today, vec!["alice", "bob"]);
    }

    #[test]
    fn test_enroll_not_kept_when_gallery_cannot_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        let gallery_dir = dir.path().join("vector_db");
        let gallery = IdentityGallery::open(GalleryPaths::in_dir(&gallery_dir), 3).unwrap();
        let ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();
        let mut s = AttendanceSession::new(gallery, ThresholdMatcher::new(0.5), ledger, 0.21);

        std::fs::write(&gallery_dir, b"").unwrap();
        let err = s.enroll("carol", &[det(&[0.0, 0.0, 1.0], None)]).unwrap_err();
        assert!(matches!(err, SessionError::Gallery(GalleryError::Io(_))));
        assert!(s.gallery().is_empty());
        assert!(!s.liveness().is_tracked("carol"));

        let out = s.process_frame(&[det(&[0.0, 0.0, 1.0], Some(0.1))]).unwrap();
        assert_eq!(out[0].color, ColorClass::Unknown);
    }
}
