/// mpv render engine over JSON IPC, with separated reader/writer tasks.
///
/// ```text
///   MpvFactory::create()
///         │  spawns mpv --idle, connects the IPC endpoint
///         ├── writer_task      ← MpvRequest via mpsc, serialised → socket
///         ├── reader_task      ← JSON lines from socket
///         │                        ├── response (request_id) → oneshot reply
///         │                        └── event / property-change → MpvEvent
///         └── translator_task  ← MpvEvent → EngineEvent (token-tagged)
/// ```
///
/// Every `loadfile` answers with the playlist entry id mpv assigned; events
/// for that entry are tagged with the transition token of the load.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use crate::engine::{
    EngineError, EngineEvent, EngineEventKind, EngineFactory, RenderEngine, TransitionToken,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use tuner_proto::platform;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSED_FOR_CACHE: u64 = 2;
pub const OBS_ICY_TITLE: u64 = 3;
pub const OBS_ARTIST: u64 = 4;
pub const OBS_TITLE: u64 = 5;

const OBSERVED: [(u64, &str); 5] = [
    (OBS_CORE_IDLE, "core-idle"),
    (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
    (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
    (OBS_ARTIST, "metadata/by-key/artist"),
    (OBS_TITLE, "metadata/by-key/title"),
];

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn playlist_entry_id(&self) -> Option<u64> {
        self.raw.get("playlist_entry_id")?.as_u64()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn observe_all_properties(&self) {
        for (id, name) in &OBSERVED {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── event translation ─────────────────────────────────────────────────────────

/// Playlist entry id → transition token, filled in from `loadfile` replies.
#[derive(Default)]
struct EntryTokens {
    by_entry: HashMap<u64, TransitionToken>,
    /// Token of the most recent `load`, used when an entry's event arrives
    /// before the `loadfile` reply that names it.
    last_loaded: Option<TransitionToken>,
}

/// Replaced entries still get a late `end-file`; older ones are forgotten.
const KEPT_ENTRIES: u64 = 8;

impl EntryTokens {
    fn record(&mut self, entry: u64, token: TransitionToken) {
        self.by_entry.insert(entry, token);
        self.by_entry
            .retain(|&id, _| id.saturating_add(KEPT_ENTRIES) > entry);
    }

    fn lookup(&self, entry: Option<u64>) -> Option<TransitionToken> {
        entry
            .and_then(|id| self.by_entry.get(&id).copied())
            .or(self.last_loaded)
    }
}

/// Turns raw mpv events into engine events for the current entry.
pub struct EventTranslator {
    entries: Arc<std::sync::Mutex<EntryTokens>>,
    current: Option<TransitionToken>,
    ready_sent: bool,
    buffering: bool,
    icy_title: Option<String>,
    artist: Option<String>,
    title: Option<String>,
}

impl EventTranslator {
    fn new(entries: Arc<std::sync::Mutex<EntryTokens>>) -> Self {
        Self {
            entries,
            current: None,
            ready_sent: false,
            buffering: false,
            icy_title: None,
            artist: None,
            title: None,
        }
    }

    fn token_for(&self, entry: Option<u64>) -> Option<TransitionToken> {
        self.entries.lock().ok().and_then(|e| e.lookup(entry))
    }

    pub fn translate(&mut self, event: &MpvEvent) -> Vec<EngineEvent> {
        if let Some((id, data)) = event.as_property_change() {
            return self.property_changed(id, data);
        }

        match event.event_name() {
            Some("start-file") => {
                self.current = self.token_for(event.playlist_entry_id());
                self.ready_sent = false;
                self.buffering = false;
                self.icy_title = None;
                self.artist = None;
                self.title = None;
                Vec::new()
            }
            Some("end-file") => {
                let Some(token) = self.token_for(event.playlist_entry_id()) else {
                    return Vec::new();
                };
                let kind = match event.raw.get("reason").and_then(Value::as_str) {
                    Some("eof") => EngineEventKind::Ended,
                    Some("error") => EngineEventKind::Error(
                        event
                            .raw
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or("playback error")
                            .to_string(),
                    ),
                    // stop / quit / redirect: replaced or torn down on purpose
                    _ => return Vec::new(),
                };
                if self.current == Some(token) {
                    self.current = None;
                }
                vec![EngineEvent { token, kind }]
            }
            _ => Vec::new(),
        }
    }

    fn property_changed(&mut self, id: u64, data: &Value) -> Vec<EngineEvent> {
        let Some(token) = self.current else {
            return Vec::new();
        };
        let emit = |kind| vec![EngineEvent { token, kind }];

        match id {
            OBS_CORE_IDLE => {
                if data.as_bool() == Some(false) && !self.ready_sent {
                    self.ready_sent = true;
                    self.buffering = false;
                    return emit(EngineEventKind::Ready);
                }
                Vec::new()
            }
            OBS_PAUSED_FOR_CACHE => {
                let buffering = data.as_bool().unwrap_or(false);
                if buffering == self.buffering {
                    return Vec::new();
                }
                self.buffering = buffering;
                emit(EngineEventKind::Buffering(buffering))
            }
            OBS_ICY_TITLE | OBS_ARTIST | OBS_TITLE => {
                let value = data.as_str().map(str::to_string);
                let slot = match id {
                    OBS_ICY_TITLE => &mut self.icy_title,
                    OBS_ARTIST => &mut self.artist,
                    _ => &mut self.title,
                };
                if *slot == value {
                    return Vec::new();
                }
                *slot = value;
                emit(EngineEventKind::MetadataChanged {
                    title: self.icy_title.clone().or_else(|| self.title.clone()),
                    artist: self.artist.clone(),
                })
            }
            _ => Vec::new(),
        }
    }
}

async fn translator_task(
    label: String,
    mut mpv_rx: mpsc::Receiver<MpvEvent>,
    mut translator: EventTranslator,
    events: mpsc::Sender<EngineEvent>,
    released: Arc<AtomicBool>,
) {
    while let Some(event) = mpv_rx.recv().await {
        for engine_event in translator.translate(&event) {
            debug!("mpv[{}]: {:?}", label, engine_event);
            if events.send(engine_event).await.is_err() {
                return;
            }
        }
    }
    // IPC closed under a live item: surface it so the orchestrator retries.
    if !released.load(Ordering::Acquire) {
        if let Some(token) = translator.current {
            warn!("mpv[{}]: IPC connection lost", label);
            let _ = events
                .send(EngineEvent {
                    token,
                    kind: EngineEventKind::Error("mpv IPC connection closed".into()),
                })
                .await;
        }
    }
}

// ── engine ────────────────────────────────────────────────────────────────────

pub struct MpvEngine {
    label: String,
    socket_name: String,
    handle: MpvHandle,
    process: Mutex<Option<tokio::process::Child>>,
    entries: Arc<std::sync::Mutex<EntryTokens>>,
    released: Arc<AtomicBool>,
}

impl MpvEngine {
    async fn command(&self, command: Value) -> Result<Value, EngineError> {
        if self.released.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        match self.handle.send(command).await {
            Ok(v) => Ok(v),
            Err(e) => {
                if !self.process_alive().await {
                    Err(EngineError::Closed)
                } else {
                    Err(EngineError::Command(e.to_string()))
                }
            }
        }
    }

    async fn process_alive(&self) -> bool {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }
}

#[async_trait]
impl RenderEngine for MpvEngine {
    async fn load(&self, uri: &str, token: TransitionToken) -> Result<(), EngineError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.last_loaded = Some(token);
        }
        let reply = self.command(json!(["loadfile", uri, "replace"])).await?;
        if let Some(entry) = reply
            .get("data")
            .and_then(|d| d.get("playlist_entry_id"))
            .and_then(Value::as_u64)
        {
            debug!("mpv[{}]: entry {} is token {}", self.label, entry, token);
            if let Ok(mut entries) = self.entries.lock() {
                entries.record(entry, token);
            }
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.command(json!(["set_property", "pause", false])).await?;
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.command(json!(["set_property", "pause", true])).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.command(json!(["stop"])).await?;
        Ok(())
    }

    async fn set_gain(&self, gain: f32) -> Result<(), EngineError> {
        let vol_pct = (gain * 100.0).clamp(0.0, 100.0);
        self.command(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("mpv[{}]: releasing", self.label);
        let _ = self.handle.send(json!(["quit"])).await;
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
    }
}

// ── factory ───────────────────────────────────────────────────────────────────

/// Spawns one mpv process per engine instance.
pub struct MpvFactory {
    binary: PathBuf,
}

impl MpvFactory {
    pub fn new(configured: Option<&Path>) -> Result<Self, EngineError> {
        let binary = platform::find_mpv_binary(configured)
            .ok_or_else(|| EngineError::Init("mpv binary not found".into()))?;
        info!("mpv: using {}", binary.display());
        Ok(Self { binary })
    }

    fn spawn(&self, socket_name: &str) -> Result<tokio::process::Child, EngineError> {
        tokio::process::Command::new(&self.binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg("--volume=0")
            .arg(platform::mpv_socket_arg(socket_name))
            .arg("--quiet")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Init(format!("failed to spawn mpv: {e}")))
    }
}

#[async_trait]
impl EngineFactory for MpvFactory {
    async fn create(
        &self,
        label: &str,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn RenderEngine>, EngineError> {
        let socket_name = platform::mpv_socket_name(label);
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&socket_name).await;
        }

        info!("mpv[{}]: spawning new process", label);
        let child = self.spawn(&socket_name)?;

        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(256);
        let handle = connect(&socket_name, mpv_tx)
            .await
            .map_err(|e| EngineError::Init(e.to_string()))?;
        handle.observe_all_properties().await;

        let entries = Arc::new(std::sync::Mutex::new(EntryTokens::default()));
        let released = Arc::new(AtomicBool::new(false));
        tokio::spawn(translator_task(
            label.to_string(),
            mpv_rx,
            EventTranslator::new(entries.clone()),
            events,
            released.clone(),
        ));

        Ok(Arc::new(MpvEngine {
            label: label.to_string(),
            socket_name,
            handle,
            process: Mutex::new(Some(child)),
            entries,
            released,
        }))
    }
}

// ── IPC connection ────────────────────────────────────────────────────────────

#[cfg(unix)]
async fn connect(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
    let socket_path = PathBuf::from(socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    if !socket_path.exists() {
        anyhow::bail!("mpv IPC socket did not appear");
    }
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    let stream = UnixStream::connect(&socket_path).await?;
    info!("mpv: connected to IPC socket {}", socket_name);
    let (read_half, write_half) = stream.into_split();
    Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
}

#[cfg(windows)]
async fn connect(socket_name: &str, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe {}", pipe_path);
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
        }
    }
    anyhow::bail!("mpv named pipe did not appear")
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {e}")).await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
