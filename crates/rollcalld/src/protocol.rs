//! Line-delimited JSON protocol between the face-analysis pipeline and the daemon.
//!
//! One request per stdin line, one response per stdout line, in order.

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{Annotation, Detection, SessionError, SessionStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// All faces found in one video frame.
    Frame { detections: Vec<Detection> },
    /// Enroll the most confident face of one frame under `name`.
    Enroll {
        name: String,
        detections: Vec<Detection>,
    },
    Status,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Annotations {
        annotations: Vec<Annotation>,
        /// Set when attendance could not be recorded for this frame.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Enrolled { id: i64, name: String },
    Status(SessionStatus),
    Error { message: String },
}

impl Response {
    fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Parse one line and run it against the engine.
///
/// Returns `None` for blank lines. Request-level failures become
/// [`Response::Error`]; only a dead engine is returned as `Err`.
pub async fn handle_line(engine: &EngineHandle, line: &str) -> Result<Option<Response>, EngineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "malformed request");
            return Ok(Some(Response::error(format!("malformed request: {e}"))));
        }
    };

    let response = match request {
        Request::Frame { detections } => match engine.process_frame(detections).await {
            Ok(annotations) => Response::Annotations {
                annotations,
                error: None,
            },
            Err(EngineError::Session(SessionError::MarkFailed {
                annotations,
                source,
            })) => Response::Annotations {
                annotations,
                error: Some(format!("attendance not recorded: {source}")),
            },
            Err(EngineError::Session(e)) => {
                tracing::error!(error = %e, "frame processing failed");
                Response::error(e.to_string())
            }
            Err(e) => return Err(e),
        },
        Request::Enroll { name, detections } => {
            tracing::info!(name = %name, faces = detections.len(), "enroll requested");
            match engine.enroll(name.clone(), detections).await {
                Ok(id) => Response::Enrolled { id: id.0, name },
                Err(EngineError::Session(e)) => {
                    tracing::warn!(name = %name, error = %e, "enroll failed");
                    Response::error(e.to_string())
                }
                Err(e) => return Err(e),
            }
        }
        Request::Status => Response::Status(engine.status().await?),
    };
    Ok(Some(response))
}
