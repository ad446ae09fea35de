pub mod catalog;
pub mod core;
pub mod debounce;
pub mod engine;
pub mod failover;
pub mod http;
pub mod metadata;
pub mod mpv;
pub mod queue;
pub mod seed;
pub mod socket;
pub mod transition;
pub mod validator;

use std::sync::Arc;
use tuner_proto::protocol::{PlaybackSnapshot, QueueItem, SongInfo};

/// In-process fan-out from the orchestrator (and the log layer) to every
/// connected client.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated(Arc<PlaybackSnapshot>),
    MetadataUpdated(Option<SongInfo>),
    QueueUpdated(Arc<Vec<QueueItem>>),
    Log(String),
    /// User-visible failure, e.g. a station that could not be played.
    Error(String),
}
