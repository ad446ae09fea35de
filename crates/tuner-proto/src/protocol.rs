use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client (UI or session transport) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    SelectStation { station: Station },
    /// Start the queue item with this media id (`station_<id>`).
    PlayMediaId { media_id: String },
    TogglePlayPause,
    SkipNext,
    SkipPrevious,
    SetVolume { value: f32 },
    StartSleepTimer { minutes: u32 },
    CancelSleepTimer,
    Stop,
    /// The saved station list changed; re-read it from the store.
    ReloadStations,
    GetState,
}

/// Payload-free discriminant of a [`Command`], used as a debounce key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SelectStation,
    PlayMediaId,
    TogglePlayPause,
    SkipNext,
    SkipPrevious,
    SetVolume,
    StartSleepTimer,
    CancelSleepTimer,
    Stop,
    ReloadStations,
    GetState,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SelectStation { .. } => CommandKind::SelectStation,
            Command::PlayMediaId { .. } => CommandKind::PlayMediaId,
            Command::TogglePlayPause => CommandKind::TogglePlayPause,
            Command::SkipNext => CommandKind::SkipNext,
            Command::SkipPrevious => CommandKind::SkipPrevious,
            Command::SetVolume { .. } => CommandKind::SetVolume,
            Command::StartSleepTimer { .. } => CommandKind::StartSleepTimer,
            Command::CancelSleepTimer => CommandKind::CancelSleepTimer,
            Command::Stop => CommandKind::Stop,
            Command::ReloadStations => CommandKind::ReloadStations,
            Command::GetState => CommandKind::GetState,
        }
    }
}

impl CommandKind {
    /// Transport-style commands that companion surfaces are known to
    /// double-fire.  Selections and volume changes are never debounced.
    pub fn is_debounced(self) -> bool {
        matches!(
            self,
            CommandKind::TogglePlayPause | CommandKind::SkipNext | CommandKind::SkipPrevious
        )
    }
}

/// Messages sent from daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version, state snapshot and queue.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: PlaybackSnapshot,
        queue: Vec<QueueItem>,
    },
    State {
        data: PlaybackSnapshot,
    },
    Metadata {
        song: Option<SongInfo>,
    },
    Queue {
        items: Vec<QueueItem>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Outcome of the last playability probe for a station.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ValidationStatus {
    #[default]
    Unknown,
    Validating,
    Working,
    Failed,
}

/// Coarse orchestrator phase, published alongside the derived flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Switching,
    Playing,
    Paused,
    Failed,
}

/// Structured "now playing" info derived from stream metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongInfo {
    pub artist: String,
    pub title: String,
}

impl SongInfo {
    pub fn display(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// The single combined value observers see.  Station, `playing` and
/// `buffering` always change together in one snapshot; `playing` and
/// `buffering` are never both true.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlaybackSnapshot {
    /// Monotonic revision counter, incremented on every published change.
    #[serde(default)]
    pub rev: u64,
    pub phase: PlaybackPhase,
    pub station: Option<Station>,
    pub transition_token: Option<u64>,
    pub playing: bool,
    pub buffering: bool,
    pub volume: f32,
    pub metadata: Option<SongInfo>,
    /// Station currently being probed before playback, if any.
    #[serde(default)]
    pub validating_station_id: Option<String>,
    #[serde(default)]
    pub sleep_timer_deadline: Option<DateTime<Local>>,
}

impl PlaybackSnapshot {
    pub fn current_station_id(&self) -> Option<&str> {
        self.station.as_ref().map(|s| s.id.as_str())
    }

    /// Equality ignoring `rev`, used to suppress redundant publishes.
    pub fn same_content(&self, other: &PlaybackSnapshot) -> bool {
        PlaybackSnapshot { rev: 0, ..self.clone() } == PlaybackSnapshot { rev: 0, ..other.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    /// Stable identifier (the catalog uuid for stations saved from search).
    pub id: String,
    pub name: String,
    pub url: String,
    /// Set only for stations that came from the radio-browser catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_uuid: Option<String>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub image_url: String,
    /// ISO country code
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub language: String,
    /// Searchable tags (genre, style, language, etc.)
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub votes: i64,
    /// Order in the saved list.
    #[serde(default)]
    pub position: usize,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn is_likely_working(&self) -> bool {
        !self.url.trim().is_empty()
            && (self.validation_status == ValidationStatus::Working
                || (self.validation_status == ValidationStatus::Unknown && self.bitrate > 0))
    }
}

/// One playable entry of the browsable queue offered to session transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub media_id: String,
    pub station_id: String,
    /// 1-based position shown on companion displays.
    pub number: usize,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub artwork_url: Option<String>,
    pub stream_url: String,
}

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// More bytes are needed before a frame can be decoded.
    #[error("incomplete frame")]
    Incomplete,
    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(usize),
    /// A complete frame whose body is not a valid message.  `consumed`
    /// covers the whole frame so the reader can skip it.
    #[error("malformed frame: {source}")]
    Malformed {
        consumed: usize,
        source: serde_json::Error,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < 4 {
            return Err(FrameError::Incomplete);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Err(FrameError::Incomplete);
        }
        match serde_json::from_slice(&data[4..4 + len]) {
            Ok(msg) => Ok((msg, 4 + len)),
            Err(source) => Err(FrameError::Malformed {
                consumed: 4 + len,
                source,
            }),
        }
    }
}
