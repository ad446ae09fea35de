use crate::protocol::{PlaybackSnapshot, QueueItem};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read side of the published playback state.
///
/// Only the orchestrator writes (`publish`, `set_queue`); HTTP handlers and
/// transport sessions read.  A snapshot is replaced as a whole under one write
/// lock, so readers never observe a station from one update next to a
/// `playing` flag from another.
pub struct StateManager {
    state: Arc<RwLock<PlaybackSnapshot>>,
    queue: Arc<RwLock<Vec<QueueItem>>>,
}

impl StateManager {
    pub fn new(initial: PlaybackSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(PlaybackSnapshot { rev: 1, ..initial })),
            queue: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn get_state(&self) -> PlaybackSnapshot {
        self.state.read().await.clone()
    }

    pub async fn get_queue(&self) -> Vec<QueueItem> {
        self.queue.read().await.clone()
    }

    /// Replace the snapshot if its content changed.  Returns the stored value
    /// (with its new `rev`) when something was published.
    pub async fn publish(&self, next: PlaybackSnapshot) -> Option<PlaybackSnapshot> {
        let mut state = self.state.write().await;
        if state.same_content(&next) {
            return None;
        }
        let rev = state.rev + 1;
        *state = PlaybackSnapshot { rev, ..next };
        Some(state.clone())
    }

    pub async fn set_queue(&self, items: Vec<QueueItem>) {
        *self.queue.write().await = items;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlaybackPhase;

    #[tokio::test]
    async fn publish_bumps_rev_only_on_change() {
        let manager = StateManager::new(PlaybackSnapshot::default());
        assert_eq!(manager.get_state().await.rev, 1);

        let playing = PlaybackSnapshot {
            phase: PlaybackPhase::Playing,
            playing: true,
            ..Default::default()
        };
        let published = manager.publish(playing.clone()).await.unwrap();
        assert_eq!(published.rev, 2);
        assert!(manager.publish(playing).await.is_none());
        assert_eq!(manager.get_state().await.rev, 2);
    }
}
