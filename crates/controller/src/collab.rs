//! Collaborators the sync controller drives but does not implement.

use tokio_util::sync::CancellationToken;
use vsync_core::ConversionError;

use crate::object::SyncObject;

/// Failure of a create, patch or delete call against one plane.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ClientError::Other(Box::new(err))
    }
}

/// Produces a physical-plane shaped copy of a virtual object with ownership
/// metadata attached. Must not mutate its input.
pub trait MetadataTranslator<O: SyncObject>: Send + Sync {
    fn translate(&self, obj: &O) -> Result<O, ConversionError>;
}

/// Object store operations against one plane. Every call takes the caller's
/// cancellation token.
#[async_trait::async_trait]
pub trait PlaneClient<O: SyncObject>: Send + Sync {
    async fn create(&self, cancel: &CancellationToken, obj: &O) -> Result<(), ClientError>;

    /// Merge-patch `current` so that it becomes `target`.
    async fn patch(&self, cancel: &CancellationToken, current: &O, target: &O) -> Result<(), ClientError>;

    async fn delete(&self, cancel: &CancellationToken, obj: &O) -> Result<(), ClientError>;
}

/// Fire-and-forget warning events. Implementations must not block.
pub trait EventRecorder<O: SyncObject>: Send + Sync {
    fn record_warning(&self, obj: &O, reason: &str, message: &str);
}

/// Recorder that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl<O: SyncObject> EventRecorder<O> for NoopRecorder {
    fn record_warning(&self, _obj: &O, _reason: &str, _message: &str) {}
}
