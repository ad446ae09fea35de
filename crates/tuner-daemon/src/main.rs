use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tuner_daemon::catalog::Catalog;
use tuner_daemon::core::{self, OrchestratorParts};
use tuner_daemon::mpv::MpvFactory;
use tuner_daemon::validator::StationValidator;
use tuner_daemon::{http, seed, socket, BroadcastMessage};
use tuner_proto::config::Config;
use tuner_proto::store::{JsonSettingsStore, JsonStationStore, StationStore};

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so the log layer can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = tuner_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tuner_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if let Err(e) = std::fs::write(&config.daemon.pid_file, std::process::id().to_string()) {
        warn!("Failed to write pid file {:?}: {}", config.daemon.pid_file, e);
    }

    // Saved stations, seeded on first run
    let station_store = Arc::new(JsonStationStore::open(config.daemon.stations_file.clone()));
    if station_store.stations().await.is_empty() {
        let seeded = seed::seed_stations(&config).await;
        if !seeded.is_empty() {
            station_store.replace_all(seeded).await?;
        }
    }
    let store: Arc<dyn StationStore> = station_store;
    let settings = Arc::new(JsonSettingsStore::open(config.daemon.state_file.clone()));

    let factory = Arc::new(MpvFactory::new(config.daemon.mpv_binary.as_deref())?);
    let catalog = Arc::new(Catalog::new(&config.catalog)?);
    let validator = Arc::new(StationValidator::new(
        factory.clone(),
        store.clone(),
        config.playback.validation_timeout(),
    ));

    let (orchestrator, orchestrator_task) = core::spawn(OrchestratorParts {
        config: config.playback.clone(),
        factory,
        store: store.clone(),
        settings,
        validator: validator.clone(),
        broadcast_tx: broadcast_tx.clone(),
    })
    .await?;

    let clients = Arc::new(tokio::sync::RwLock::new(Vec::<socket::ClientHandle>::new()));
    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        tuner_proto::platform::DAEMON_TCP_PORT,
        orchestrator.clone(),
        clients,
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                orchestrator: orchestrator.clone(),
                store,
                catalog,
                validator,
            },
        );
    }

    let shutdown = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            shutdown.shutdown().await;
        }
    });

    info!("Daemon initialised, running event loop");
    let result = orchestrator_task.await?;
    let _ = std::fs::remove_file(&config.daemon.pid_file);
    result
}
