#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tuner_daemon::core::{self, OrchestratorHandle, OrchestratorParts};
use tuner_daemon::engine::{
    EngineError, EngineEvent, EngineEventKind, EngineFactory, RenderEngine, TransitionToken,
};
use tuner_daemon::validator::StationValidator;
use tuner_daemon::BroadcastMessage;
use tuner_proto::config::PlaybackConfig;
use tuner_proto::protocol::{Command, PlaybackSnapshot, Station};
use tuner_proto::store::{JsonSettingsStore, JsonStationStore, PersistentState};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load { uri: String, token: u64 },
    Play,
    Pause,
    Stop,
    Gain(f32),
    Release,
}

/// Engine double.  Live engines only record; probe engines answer a load
/// with ready or error depending on the stream URL.
struct FakeEngine {
    label: String,
    factory: Arc<FactoryShared>,
    events: mpsc::Sender<EngineEvent>,
    loaded: Mutex<Option<(String, TransitionToken)>>,
}

impl FakeEngine {
    fn record(&self, call: Call) {
        if self.label == "live" {
            self.factory.live_calls.lock().unwrap().push(call);
        }
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn load(&self, uri: &str, token: TransitionToken) -> Result<(), EngineError> {
        if self.label == "live" && self.factory.close_next_live_load.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.record(Call::Load {
            uri: uri.to_string(),
            token: token.0,
        });
        *self.loaded.lock().unwrap() = Some((uri.to_string(), token));
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.record(Call::Play);
        if self.label.starts_with("probe") {
            let loaded = self.loaded.lock().unwrap().clone();
            if let Some((uri, token)) = loaded {
                let kind = if self.factory.silent_urls.lock().unwrap().contains(&uri) {
                    return Ok(());
                } else if self.factory.failing_urls.lock().unwrap().contains(&uri) {
                    EngineEventKind::Error("connection refused".into())
                } else {
                    EngineEventKind::Ready
                };
                let _ = self.events.try_send(EngineEvent { token, kind });
            }
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.record(Call::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.record(Call::Stop);
        Ok(())
    }

    async fn set_gain(&self, gain: f32) -> Result<(), EngineError> {
        self.record(Call::Gain(gain));
        Ok(())
    }

    async fn release(&self) {
        self.record(Call::Release);
        self.factory
            .released
            .lock()
            .unwrap()
            .push(self.label.clone());
    }
}

#[derive(Default)]
pub struct FactoryShared {
    pub created: Mutex<Vec<String>>,
    pub released: Mutex<Vec<String>>,
    pub live_calls: Mutex<Vec<Call>>,
    pub live_events: Mutex<Option<mpsc::Sender<EngineEvent>>>,
    pub silent_urls: Mutex<HashSet<String>>,
    pub failing_urls: Mutex<HashSet<String>>,
    pub close_next_live_load: AtomicBool,
    pub fail_init: AtomicBool,
}

pub struct FakeFactory {
    pub shared: Arc<FactoryShared>,
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn create(
        &self,
        label: &str,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn RenderEngine>, EngineError> {
        if self.shared.fail_init.load(Ordering::SeqCst) {
            return Err(EngineError::Init("no audio backend".into()));
        }
        self.shared.created.lock().unwrap().push(label.to_string());
        if label == "live" {
            *self.shared.live_events.lock().unwrap() = Some(events.clone());
        }
        Ok(Arc::new(FakeEngine {
            label: label.to_string(),
            factory: self.shared.clone(),
            events,
            loaded: Mutex::new(None),
        }))
    }
}

pub fn station(id: &str, name: &str) -> Station {
    Station::new(id, name, format!("http://{id}.example/live"))
}

pub fn stations() -> Vec<Station> {
    vec![
        station("a", "Alpha FM"),
        station("b", "Beta Radio"),
        station("c", "Gamma Jazz"),
    ]
}

/// Validation off: switches load immediately.
pub fn direct_config() -> PlaybackConfig {
    PlaybackConfig {
        validate_before_play: false,
        ..PlaybackConfig::default()
    }
}

pub struct Harness {
    pub handle: OrchestratorHandle,
    pub factory: Arc<FactoryShared>,
    pub settings: Arc<JsonSettingsStore>,
    pub store: Arc<JsonStationStore>,
    pub validator: Arc<StationValidator>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
    pub broadcasts: broadcast::Receiver<BroadcastMessage>,
}

impl Harness {
    pub async fn start(config: PlaybackConfig, stations: Vec<Station>) -> Harness {
        Self::start_with(config, stations, PersistentState::default(), Arc::default())
            .await
            .unwrap()
    }

    pub async fn start_with(
        config: PlaybackConfig,
        stations: Vec<Station>,
        persisted: PersistentState,
        shared: Arc<FactoryShared>,
    ) -> Result<Harness, EngineError> {
        let factory = Arc::new(FakeFactory {
            shared: shared.clone(),
        });
        let store = Arc::new(JsonStationStore::ephemeral(stations));
        let settings = Arc::new(JsonSettingsStore::ephemeral(persisted));
        let validator = Arc::new(StationValidator::new(
            factory.clone(),
            store.clone(),
            config.validation_timeout(),
        ));
        let (broadcast_tx, broadcasts) = broadcast::channel(256);

        let (handle, _task) = core::spawn(OrchestratorParts {
            config,
            factory,
            store: store.clone(),
            settings: settings.clone(),
            validator: validator.clone(),
            broadcast_tx: broadcast_tx.clone(),
        })
        .await?;

        let harness = Harness {
            handle,
            factory: shared,
            settings,
            store,
            validator,
            broadcast_tx,
            broadcasts,
        };
        settle().await;
        Ok(harness)
    }

    pub async fn send(&self, command: Command) {
        self.send_from("test", command).await;
    }

    pub async fn send_from(&self, origin: &str, command: Command) {
        self.handle.send(origin, command).await.unwrap();
        settle().await;
    }

    pub async fn select(&self, station: &Station) {
        self.send(Command::SelectStation {
            station: station.clone(),
        })
        .await;
    }

    /// Inject an engine callback as the live engine would.
    pub async fn emit(&self, token: u64, kind: EngineEventKind) {
        let tx = self.factory.live_events.lock().unwrap().clone().unwrap();
        tx.send(EngineEvent {
            token: TransitionToken(token),
            kind,
        })
        .await
        .unwrap();
        settle().await;
    }

    pub async fn state(&self) -> PlaybackSnapshot {
        self.handle.state_manager().get_state().await
    }

    pub async fn token(&self) -> u64 {
        self.state().await.transition_token.unwrap()
    }

    /// Select a station and report it ready; returns its token.
    pub async fn play(&self, station: &Station) -> u64 {
        self.select(station).await;
        let token = self.token().await;
        self.emit(token, EngineEventKind::Ready).await;
        token
    }

    pub fn live_calls(&self) -> Vec<Call> {
        self.factory.live_calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.factory.live_calls.lock().unwrap().clear();
    }

    pub fn loads(&self) -> Vec<(String, u64)> {
        self.live_calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Load { uri, token } => Some((uri, token)),
                _ => None,
            })
            .collect()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.live_calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Gain(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    /// Drain broadcasts received so far.
    pub fn drain(&mut self) -> Vec<BroadcastMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.broadcasts.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Let every runnable task catch up.  Under a paused clock this advances
/// virtual time by one millisecond once the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}
