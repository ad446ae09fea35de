/// Orchestrator: single-owner event loop for all playback state.
///
/// Every input is an `OrchestratorEvent` on one mpsc channel: client
/// commands, engine callbacks, and the timers and background results the
/// loop itself schedules (fade steps, retries, validation outcomes, sleep
/// timer).  Nothing else mutates playback state.
///
/// Each station switch mints a new `TransitionToken`.  Engine callbacks and
/// background results carry the token they were started under and are
/// dropped when it is no longer current, so a late callback from a previous
/// station can never flip the published state.
///
/// After each event the loop derives one `PlaybackSnapshot` from its phase
/// and publishes it through `StateManager` + `BroadcastMessage::StateUpdated`
/// when anything changed.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use tuner_proto::config::PlaybackConfig;
use tuner_proto::protocol::{
    Command, PlaybackPhase, PlaybackSnapshot, SongInfo, Station, ValidationStatus,
};
use tuner_proto::state::StateManager;
use tuner_proto::store::{SettingsStore, StationStore};

use crate::debounce::CommandDebouncer;
use crate::engine::{
    EngineError, EngineEvent, EngineEventKind, EngineFactory, RenderEngine, TransitionToken,
};
use crate::metadata;
use crate::queue::{build_queue, resolve_start_index, station_id_from_media_id};
use crate::transition::TransitionGuard;
use crate::validator::StationValidator;
use crate::BroadcastMessage;

const LIVE_ENGINE_LABEL: &str = "live";

// ── OrchestratorEvent ─────────────────────────────────────────────────────────

/// All inputs into the orchestrator loop.
#[derive(Debug)]
pub enum OrchestratorEvent {
    /// A command from a client.  `origin` identifies the sender for
    /// debouncing (one per TCP connection, one for the HTTP API).
    Command { origin: String, command: Command },
    Engine(EngineEvent),
    FadeStep { token: u64, index: u32 },
    RetryLoad { token: TransitionToken },
    ValidationFinished { token: TransitionToken, ok: bool },
    SleepTimerExpired { id: u64 },
    /// A client went away; its debounce history can be dropped.
    OriginClosed(String),
    Shutdown,
}

/// Cloneable entry point to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchestratorEvent>,
    state: Arc<StateManager>,
}

impl OrchestratorHandle {
    pub async fn send(&self, origin: &str, command: Command) -> anyhow::Result<()> {
        self.tx
            .send(OrchestratorEvent::Command {
                origin: origin.to_string(),
                command,
            })
            .await
            .map_err(|_| anyhow::anyhow!("orchestrator is not running"))
    }

    pub async fn origin_closed(&self, origin: &str) {
        let _ = self
            .tx
            .send(OrchestratorEvent::OriginClosed(origin.to_string()))
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(OrchestratorEvent::Shutdown).await;
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }
}

/// Collaborators the orchestrator is built from.
pub struct OrchestratorParts {
    pub config: PlaybackConfig,
    pub factory: Arc<dyn EngineFactory>,
    pub store: Arc<dyn StationStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub validator: Arc<StationValidator>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

/// Build an orchestrator and run it on its own task.  Fails only if the live
/// render engine cannot be started.
pub async fn spawn(
    parts: OrchestratorParts,
) -> Result<(OrchestratorHandle, tokio::task::JoinHandle<anyhow::Result<()>>), EngineError> {
    let (event_tx, event_rx) = mpsc::channel::<OrchestratorEvent>(256);
    let orchestrator = Orchestrator::new(parts, event_tx).await?;
    let handle = orchestrator.handle();
    let task = tokio::spawn(orchestrator.run(event_rx));
    Ok((handle, task))
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Switching {
        token: TransitionToken,
        station: Station,
    },
    Playing(Station),
    Paused(Station),
    Failed(Station),
}

impl Phase {
    fn station(&self) -> Option<&Station> {
        match self {
            Phase::Idle => None,
            Phase::Switching { station, .. }
            | Phase::Playing(station)
            | Phase::Paused(station)
            | Phase::Failed(station) => Some(station),
        }
    }
}

pub struct Orchestrator {
    config: PlaybackConfig,
    state: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Channel back into our own loop, for timers and background results.
    event_tx: mpsc::Sender<OrchestratorEvent>,
    factory: Arc<dyn EngineFactory>,
    engine: Arc<dyn RenderEngine>,
    engine_events_tx: mpsc::Sender<EngineEvent>,
    store: Arc<dyn StationStore>,
    settings: Arc<dyn SettingsStore>,
    validator: Arc<StationValidator>,
    debouncer: CommandDebouncer,
    guard: TransitionGuard,
    /// Saved stations, in skip order.
    stations: Vec<Station>,
    phase: Phase,
    token: TransitionToken,
    /// Same-item reloads since the item last became ready.
    retries: u32,
    /// Live item is waiting on the network (buffering or a pending retry).
    stalled: bool,
    /// The current item failed and must be reloaded before it can play again.
    retry_pending: bool,
    metadata: Option<SongInfo>,
    volume: f32,
    last_station_id: Option<String>,
    validating: Option<String>,
    sleep_deadline: Option<DateTime<Local>>,
    sleep_seq: u64,
    sleep_task: Option<AbortHandle>,
}

impl Orchestrator {
    pub async fn new(
        parts: OrchestratorParts,
        event_tx: mpsc::Sender<OrchestratorEvent>,
    ) -> Result<Self, EngineError> {
        let OrchestratorParts {
            config,
            factory,
            store,
            settings,
            validator,
            broadcast_tx,
        } = parts;

        // Engine callbacks funnel into the main loop.
        let (engine_events_tx, mut engine_events_rx) = mpsc::channel::<EngineEvent>(64);
        let forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_events_rx.recv().await {
                if forward_tx.send(OrchestratorEvent::Engine(event)).await.is_err() {
                    break;
                }
            }
        });

        let engine = factory
            .create(LIVE_ENGINE_LABEL, engine_events_tx.clone())
            .await?;

        let persisted = settings.load().await;
        let volume = config.clamp_volume(persisted.volume.unwrap_or(config.default_volume));
        let stations = store.stations().await;
        info!(
            "Orchestrator: {} saved stations, volume {:.2}",
            stations.len(),
            volume
        );

        let state = Arc::new(StateManager::new(PlaybackSnapshot {
            volume,
            ..Default::default()
        }));
        state.set_queue(build_queue(&stations)).await;

        Ok(Self {
            debouncer: CommandDebouncer::new(config.debounce_window()),
            guard: TransitionGuard::new(config.fade_duration(), config.fade_steps),
            config,
            state,
            broadcast_tx,
            event_tx,
            factory,
            engine,
            engine_events_tx,
            store,
            settings,
            validator,
            stations,
            phase: Phase::Idle,
            token: TransitionToken::default(),
            retries: 0,
            stalled: false,
            retry_pending: false,
            metadata: None,
            volume,
            last_station_id: persisted.last_station_id,
            validating: None,
            sleep_deadline: None,
            sleep_seq: 0,
            sleep_task: None,
        })
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.event_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Run the event loop until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<OrchestratorEvent>) -> anyhow::Result<()> {
        info!("Orchestrator: starting event loop");
        self.publish().await;

        loop {
            let Some(event) = event_rx.recv().await else {
                info!("Orchestrator: event channel closed, shutting down");
                break;
            };
            match event {
                OrchestratorEvent::Shutdown => {
                    info!("Orchestrator: shutdown requested");
                    break;
                }
                OrchestratorEvent::Command { origin, command } => {
                    if let Err(e) = self.handle_command(&origin, command).await {
                        error!("Orchestrator: command error: {}", e);
                    }
                }
                OrchestratorEvent::Engine(event) => self.handle_engine_event(event).await,
                OrchestratorEvent::FadeStep { token, index } => {
                    if let Some(gain) = self.guard.step(token, index) {
                        if let Err(e) = self.engine.set_gain(gain).await {
                            debug!("Fade step failed: {}", e);
                        }
                    }
                }
                OrchestratorEvent::RetryLoad { token } => self.retry(token).await,
                OrchestratorEvent::ValidationFinished { token, ok } => {
                    self.validation_finished(token, ok).await
                }
                OrchestratorEvent::SleepTimerExpired { id } => self.sleep_timer_expired(id).await,
                OrchestratorEvent::OriginClosed(origin) => self.debouncer.forget_origin(&origin),
            }
            self.publish().await;
        }

        self.cleanup().await;
        Ok(())
    }

    // ── state publication ─────────────────────────────────────────────────────

    fn snapshot(&self) -> PlaybackSnapshot {
        let (phase, station, token, playing, buffering) = match &self.phase {
            Phase::Idle => (PlaybackPhase::Idle, None, None, false, false),
            Phase::Switching { token, station } => {
                (PlaybackPhase::Switching, Some(station), Some(*token), false, true)
            }
            Phase::Playing(station) => (
                PlaybackPhase::Playing,
                Some(station),
                Some(self.token),
                !self.stalled,
                self.stalled,
            ),
            Phase::Paused(station) => (
                PlaybackPhase::Paused,
                Some(station),
                Some(self.token),
                false,
                false,
            ),
            Phase::Failed(station) => (PlaybackPhase::Failed, Some(station), None, false, false),
        };
        let station = station.map(|s| Station {
            validation_status: self.validator.status_of(s),
            ..s.clone()
        });

        PlaybackSnapshot {
            rev: 0,
            phase,
            station,
            transition_token: token.map(|t| t.0),
            playing,
            buffering,
            volume: self.volume,
            metadata: self.metadata.clone(),
            validating_station_id: self.validating.clone(),
            sleep_timer_deadline: self.sleep_deadline,
        }
    }

    async fn publish(&mut self) {
        if let Some(snapshot) = self.state.publish(self.snapshot()).await {
            debug!(
                "State rev {}: {:?} playing={} buffering={}",
                snapshot.rev, snapshot.phase, snapshot.playing, snapshot.buffering
            );
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::StateUpdated(Arc::new(snapshot)));
        }
    }

    fn broadcast_error(&self, message: String) {
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, origin: &str, command: Command) -> anyhow::Result<()> {
        let kind = command.kind();
        if kind.is_debounced() && !self.debouncer.admit(origin, kind) {
            debug!("Debounced {:?} from {}", kind, origin);
            return Ok(());
        }
        info!("Orchestrator: {:?} from {}", kind, origin);

        match command {
            Command::SelectStation { station } => self.select(station).await?,
            Command::PlayMediaId { media_id } => self.play_media_id(&media_id).await?,
            Command::TogglePlayPause => self.toggle().await?,
            Command::SkipNext => self.skip(1).await?,
            Command::SkipPrevious => self.skip(-1).await?,
            Command::SetVolume { value } => self.set_volume(value).await?,
            Command::StartSleepTimer { minutes } => self.start_sleep_timer(minutes),
            Command::CancelSleepTimer => self.cancel_sleep_timer(),
            Command::Stop => self.stop().await?,
            Command::ReloadStations => self.reload_stations().await,
            Command::GetState => {
                // Published after every event anyway
            }
        }
        Ok(())
    }

    async fn select(&mut self, station: Station) -> anyhow::Result<()> {
        let same = self.phase.station().map(|s| s.id == station.id) == Some(true);
        match &self.phase {
            Phase::Playing(_) if same => self.pause().await,
            Phase::Paused(_) if same => self.resume().await,
            _ => self.begin_switch(station).await,
        }
    }

    async fn play_media_id(&mut self, media_id: &str) -> anyhow::Result<()> {
        if self.stations.is_empty() {
            return Ok(());
        }
        let queue = build_queue(&self.stations);
        let index = resolve_start_index(&queue, Some(media_id), 0);
        let station = self.stations[index].clone();
        if station_id_from_media_id(media_id) != Some(station.id.as_str()) {
            debug!("Unknown media id {}, starting from the top", media_id);
        }
        self.select(station).await
    }

    async fn toggle(&mut self) -> anyhow::Result<()> {
        match &self.phase {
            Phase::Playing(_) => self.pause().await,
            Phase::Paused(_) => self.resume().await,
            Phase::Idle => match self.remembered_station() {
                Some(station) => self.begin_switch(station).await,
                None => Ok(()),
            },
            Phase::Failed(station) => {
                debug!("Toggle ignored: {} failed to play", station.name);
                Ok(())
            }
            Phase::Switching { .. } => Ok(()),
        }
    }

    async fn skip(&mut self, delta: isize) -> anyhow::Result<()> {
        if self.stations.is_empty() {
            return Ok(());
        }
        let len = self.stations.len() as isize;
        let current = self
            .phase
            .station()
            .map(|s| s.id.clone())
            .or_else(|| self.last_station_id.clone())
            .and_then(|id| self.stations.iter().position(|s| s.id == id));
        let next = match current {
            Some(i) => (i as isize + delta).rem_euclid(len) as usize,
            None if delta >= 0 => 0,
            None => (len - 1) as usize,
        };
        let station = self.stations[next].clone();
        self.begin_switch(station).await
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        if let Phase::Playing(station) = &self.phase {
            let station = station.clone();
            self.phase = Phase::Paused(station);
            self.stalled = false;
            if let Err(e) = self.engine.pause().await {
                // Whatever broke gets repaired by a reload on resume.
                warn!("Failed to pause engine: {}", e);
                self.retry_pending = true;
            }
        }
        Ok(())
    }

    async fn resume(&mut self) -> anyhow::Result<()> {
        let Phase::Paused(station) = &self.phase else {
            return Ok(());
        };
        self.phase = Phase::Playing(station.clone());
        if !self.retry_pending {
            match self.engine.play().await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Resume failed ({}), reloading", e),
            }
        }
        self.retry_pending = false;
        self.stalled = true;
        self.reload().await;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        // Invalidate whatever is in flight for the current item.
        self.token = self.token.next();
        self.phase = Phase::Idle;
        self.stalled = false;
        self.retry_pending = false;
        self.metadata = None;
        self.validating = None;
        self.retries = 0;
        self.engine.stop().await?;
        Ok(())
    }

    async fn set_volume(&mut self, value: f32) -> anyhow::Result<()> {
        let volume = self.config.clamp_volume(value);
        if volume != value {
            debug!("Volume {} clamped to {}", value, volume);
        }
        self.volume = volume;
        if let Err(e) = self.settings.set_volume(volume).await {
            warn!("Failed to persist volume: {}", e);
        }
        // Muted or mid-fade output picks the new value up from the fade.
        if self.guard.set_target(volume) {
            self.engine.set_gain(volume).await?;
        }
        Ok(())
    }

    async fn reload_stations(&mut self) {
        self.stations = self.store.stations().await;
        let queue = build_queue(&self.stations);
        self.state.set_queue(queue.clone()).await;
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::QueueUpdated(Arc::new(queue)));
        info!("Station list reloaded: {} stations", self.stations.len());
    }

    fn remembered_station(&self) -> Option<Station> {
        let id = self.last_station_id.as_deref()?;
        self.stations.iter().find(|s| s.id == id).cloned()
    }

    // ── switching ─────────────────────────────────────────────────────────────

    async fn begin_switch(&mut self, station: Station) -> anyhow::Result<()> {
        self.token = self.token.next();
        let token = self.token;
        self.retries = 0;
        self.stalled = false;
        self.retry_pending = false;
        self.metadata = None;
        self.validating = None;
        info!("Switching to {} ({})", station.name, token);

        if self.guard.arm() {
            if let Err(e) = self.engine.set_gain(0.0).await {
                warn!("Failed to mute before switch: {}", e);
            }
            if let Err(e) = self.engine.pause().await {
                debug!("Failed to pause before switch: {}", e);
            }
        }

        self.phase = Phase::Switching {
            token,
            station: station.clone(),
        };
        self.last_station_id = Some(station.id.clone());
        if let Err(e) = self.settings.set_last_station(Some(&station.id)).await {
            warn!("Failed to persist last station: {}", e);
        }

        if self.config.validate_before_play
            && self.validator.status_of(&station) != ValidationStatus::Working
        {
            self.validating = Some(station.id.clone());
            self.validator
                .mark(&station.id, ValidationStatus::Validating)
                .await;
            let validator = Arc::clone(&self.validator);
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let ok = validator.validate(&station).await;
                let _ = tx
                    .send(OrchestratorEvent::ValidationFinished { token, ok })
                    .await;
            });
            return Ok(());
        }

        self.load_current().await;
        Ok(())
    }

    async fn validation_finished(&mut self, token: TransitionToken, ok: bool) {
        if token != self.token {
            debug!("Ignoring validation result for stale {}", token);
            return;
        }
        self.validating = None;
        if ok {
            self.load_current().await;
        } else {
            self.fail("stream did not validate").await;
        }
    }

    /// Load and start the item of the current token.
    async fn load_current(&mut self) {
        let Some(station) = self.phase.station() else {
            return;
        };
        let url = station.url.clone();
        let token = self.token;
        if let Err(e) = self.load_and_play(&url, token).await {
            self.on_engine_error(e.to_string()).await;
        }
    }

    async fn load_and_play(&mut self, url: &str, token: TransitionToken) -> Result<(), EngineError> {
        match self.engine.load(url, token).await {
            Err(EngineError::Closed) => {
                warn!("Render engine went away, starting a new one");
                self.engine.release().await;
                self.engine = self
                    .factory
                    .create(LIVE_ENGINE_LABEL, self.engine_events_tx.clone())
                    .await?;
                self.engine.set_gain(0.0).await?;
                self.engine.load(url, token).await?;
            }
            other => other?,
        }
        self.engine.play().await
    }

    async fn fail(&mut self, reason: &str) {
        let Some(station) = self.phase.station().cloned() else {
            return;
        };
        warn!("Unable to play {}: {}", station.name, reason);
        self.phase = Phase::Failed(station.clone());
        self.stalled = false;
        self.retry_pending = false;
        self.metadata = None;
        self.validating = None;
        self.validator
            .mark(&station.id, ValidationStatus::Failed)
            .await;
        if let Err(e) = self.engine.stop().await {
            debug!("Failed to stop engine: {}", e);
        }
        self.broadcast_error(format!("Unable to play station: {}", station.name));
    }

    // ── engine events ─────────────────────────────────────────────────────────

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        if event.token != self.token {
            debug!("Ignoring stale engine event {:?}", event);
            return;
        }
        match event.kind {
            EngineEventKind::Ready => self.on_ready().await,
            EngineEventKind::Buffering(buffering) => {
                if matches!(self.phase, Phase::Playing(_)) {
                    self.stalled = buffering;
                }
            }
            EngineEventKind::Error(message) => self.on_engine_error(message).await,
            EngineEventKind::Ended => self.on_ended().await,
            EngineEventKind::MetadataChanged { title, artist } => {
                self.on_metadata(title.as_deref(), artist.as_deref())
            }
        }
    }

    async fn on_ready(&mut self) {
        let station = match &self.phase {
            Phase::Switching { station, .. } | Phase::Playing(station) => station.clone(),
            _ => return,
        };
        info!("Playing {}", station.name);
        self.phase = Phase::Playing(station.clone());
        self.stalled = false;
        self.retry_pending = false;
        self.retries = 0;
        if self.validator.status_of(&station) != ValidationStatus::Working {
            self.validator
                .mark(&station.id, ValidationStatus::Working)
                .await;
        }
        self.start_fade();
    }

    fn start_fade(&mut self) {
        let Some(plan) = self.guard.begin_fade(self.volume) else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            for index in 1..=plan.steps {
                tokio::time::sleep(plan.interval).await;
                if tx
                    .send(OrchestratorEvent::FadeStep {
                        token: plan.token,
                        index,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    async fn on_engine_error(&mut self, message: String) {
        match &self.phase {
            Phase::Switching { .. } if self.retries == 0 => self.fail(&message).await,
            Phase::Switching { .. } | Phase::Playing(_) | Phase::Paused(_) => {
                if self.retries_exhausted() {
                    self.fail(&message).await;
                    return;
                }
                self.retries += 1;
                self.retry_pending = true;
                if matches!(self.phase, Phase::Paused(_)) {
                    warn!(
                        "Engine error while paused ({}); reloading on resume",
                        message
                    );
                    return;
                }
                self.stalled = true;
                let delay = self.config.engine_retry_delay();
                warn!(
                    "Engine error ({}); retry {} in {:?}",
                    message, self.retries, delay
                );
                let token = self.token;
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(OrchestratorEvent::RetryLoad { token }).await;
                });
            }
            _ => debug!("Engine error outside playback: {}", message),
        }
    }

    /// A live stream cannot legitimately end: reissue the same item.
    async fn on_ended(&mut self) {
        if !matches!(
            self.phase,
            Phase::Switching { .. } | Phase::Playing(_) | Phase::Paused(_)
        ) {
            return;
        }
        if self.retries_exhausted() {
            self.fail("stream ended").await;
            return;
        }
        self.retries += 1;
        if matches!(self.phase, Phase::Paused(_)) {
            self.retry_pending = true;
            return;
        }
        self.stalled = true;
        info!("Stream ended, reissuing (retry {})", self.retries);
        self.reload().await;
    }

    /// A delayed retry came due.  While paused it stays pending for resume.
    async fn retry(&mut self, token: TransitionToken) {
        if token != self.token || !self.retry_pending {
            return;
        }
        if matches!(self.phase, Phase::Switching { .. } | Phase::Playing(_)) {
            self.retry_pending = false;
            self.reload().await;
        }
    }

    /// Reload the current item under the same token, muted until ready.
    async fn reload(&mut self) {
        if self.guard.arm() {
            let _ = self.engine.set_gain(0.0).await;
        }
        self.load_current().await;
    }

    fn retries_exhausted(&self) -> bool {
        self.config
            .max_engine_retries
            .is_some_and(|max| self.retries >= max)
    }

    fn on_metadata(&mut self, title: Option<&str>, artist: Option<&str>) {
        let Some(station) = self.phase.station() else {
            return;
        };
        let parsed = metadata::parse(title, artist, &station.name);
        if parsed == self.metadata {
            return;
        }
        if let Some(song) = &parsed {
            info!("Now playing: {}", song.display());
        }
        self.metadata = parsed.clone();
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::MetadataUpdated(parsed));
    }

    // ── sleep timer ───────────────────────────────────────────────────────────

    fn start_sleep_timer(&mut self, minutes: u32) {
        self.cancel_sleep_timer();
        self.sleep_seq += 1;
        let id = self.sleep_seq;
        let duration = Duration::from_secs(u64::from(minutes) * 60);
        self.sleep_deadline = Some(Local::now() + chrono::Duration::minutes(i64::from(minutes)));
        info!("Sleep timer set for {} minutes", minutes);

        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(OrchestratorEvent::SleepTimerExpired { id }).await;
        });
        self.sleep_task = Some(task.abort_handle());
    }

    fn cancel_sleep_timer(&mut self) {
        if let Some(task) = self.sleep_task.take() {
            task.abort();
        }
        self.sleep_deadline = None;
    }

    async fn sleep_timer_expired(&mut self, id: u64) {
        if id != self.sleep_seq || self.sleep_deadline.is_none() {
            return;
        }
        self.sleep_deadline = None;
        self.sleep_task = None;
        info!("Sleep timer expired");
        if let Err(e) = self.pause().await {
            warn!("Failed to pause on sleep timer: {}", e);
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn cleanup(&mut self) {
        info!("Orchestrator: cleanup, releasing engine");
        self.cancel_sleep_timer();
        let _ = self.engine.stop().await;
        self.engine.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> Station {
        Station::new(id, id.to_uppercase(), format!("http://{id}.example/live"))
    }

    #[test]
    fn phase_exposes_station() {
        assert!(Phase::Idle.station().is_none());
        let s = station("a");
        let switching = Phase::Switching {
            token: TransitionToken(1),
            station: s.clone(),
        };
        assert_eq!(switching.station(), Some(&s));
        assert_eq!(Phase::Failed(s.clone()).station(), Some(&s));
    }
}
