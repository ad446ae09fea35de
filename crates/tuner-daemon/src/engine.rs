//! Render-engine seam.  The orchestrator drives engines through
//! [`RenderEngine`]; every command that starts a new item carries the
//! [`TransitionToken`] of the switch that requested it, and every event the
//! engine emits is tagged with the token of the item it concerns.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Correlation id minted on every station-switch attempt.  Only the most
/// recently minted token is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransitionToken(pub u64);

impl TransitionToken {
    pub fn next(self) -> Self {
        TransitionToken(self.0 + 1)
    }
}

impl std::fmt::Display for TransitionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub token: TransitionToken,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    /// Audio is flowing for the item.
    Ready,
    Buffering(bool),
    Error(String),
    /// The item stopped on its own.  Live streams should never do this.
    Ended,
    MetadataChanged {
        title: Option<String>,
        artist: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine failed to start: {0}")]
    Init(String),
    #[error("engine command failed: {0}")]
    Command(String),
    #[error("engine has been released")]
    Closed,
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Replace the current item with `uri`.  Events for it carry `token`.
    async fn load(&self, uri: &str, token: TransitionToken) -> Result<(), EngineError>;
    async fn play(&self) -> Result<(), EngineError>;
    async fn pause(&self) -> Result<(), EngineError>;
    async fn stop(&self) -> Result<(), EngineError>;
    /// Linear output gain, 0.0 to 1.0.
    async fn set_gain(&self, gain: f32) -> Result<(), EngineError>;
    /// Tear the instance down.  Safe to call more than once.
    async fn release(&self);
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Build a new independent engine instance.  `label` distinguishes
    /// instances in logs and IPC endpoints.
    async fn create(
        &self,
        label: &str,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn RenderEngine>, EngineError>;
}
