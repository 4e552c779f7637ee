//! rollcall-core — Biometric attendance engine.
//!
//! Matches face embeddings from an external detector against an enrolled
//! gallery, gates identities on an observed eye blink, and records at most
//! one attendance event per person per day.

pub mod config;
pub mod gallery;
pub mod ledger;
pub mod liveness;
pub mod matcher;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use gallery::{GalleryError, GalleryPaths, IdentityGallery, IdentityMap};
pub use ledger::{AttendanceEvent, AttendanceLedger, Clock, LedgerError, SystemClock};
pub use liveness::LivenessTracker;
pub use matcher::{Matcher, ThresholdMatcher, Verdict};
pub use session::{AttendanceSession, SessionError, SessionStatus};
pub use store::{LoadError, SearchHit, VectorStore};
pub use types::{Annotation, BoundingBox, ColorClass, Detection, EyeLandmarks, IdentityId};
