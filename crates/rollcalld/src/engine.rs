use rollcall_core::{Annotation, AttendanceSession, Detection, IdentityId, SessionError, SessionStatus};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from the request loop to the engine thread.
enum EngineRequest {
    Frame {
        detections: Vec<Detection>,
        reply: oneshot::Sender<Result<Vec<Annotation>, SessionError>>,
    },
    Enroll {
        name: String,
        detections: Vec<Detection>,
        reply: oneshot::Sender<Result<IdentityId, SessionError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one frame of detections through the attendance pipeline.
    pub async fn process_frame(
        &self,
        detections: Vec<Detection>,
    ) -> Result<Vec<Annotation>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Frame { detections, reply }).await?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Enroll the most confident face of an enrollment frame.
    pub async fn enroll(
        &self,
        name: String,
        detections: Vec<Detection>,
    ) -> Result<IdentityId, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll {
            name,
            detections,
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread is the sole owner of the session, so gallery, liveness and
/// ledger see requests strictly one at a time. It exits once every handle
/// is dropped.
pub fn spawn_engine(session: AttendanceSession) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut session = session;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Frame { detections, reply } => {
                        let _ = reply.send(session.process_frame(&detections));
                    }
                    EngineRequest::Enroll {
                        name,
                        detections,
                        reply,
                    } => {
                        let _ = reply.send(session.enroll(&name, &detections));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(session.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
