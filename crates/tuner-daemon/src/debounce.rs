use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tuner_proto::protocol::CommandKind;

/// Collapses duplicate rapid commands from one origin.
///
/// Owned by the command loop, so no locking.  Only admitted commands reset
/// the window; a burst of presses is admitted once per window.
pub struct CommandDebouncer {
    window: Duration,
    last_admitted: HashMap<(String, CommandKind), Instant>,
}

impl CommandDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_admitted: HashMap::new(),
        }
    }

    pub fn admit(&mut self, origin: &str, kind: CommandKind) -> bool {
        let now = Instant::now();
        let key = (origin.to_string(), kind);
        if let Some(last) = self.last_admitted.get(&key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_admitted.insert(key, now);
        true
    }

    /// Drop entries for an origin that went away.
    pub fn forget_origin(&mut self, origin: &str) {
        self.last_admitted.retain(|(o, _), _| o != origin);
    }
}
