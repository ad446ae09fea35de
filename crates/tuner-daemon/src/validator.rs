//! Playability probe for stations that are not known to work.
//!
//! A probe is a throwaway engine instance, muted, that loads the stream and
//! waits for the first ready or error signal.  It never touches the live
//! engine.  Concurrent calls for one station share a single probe.

use crate::engine::{EngineEventKind, EngineFactory, TransitionToken};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tuner_proto::protocol::{Station, ValidationStatus};
use tuner_proto::store::StationStore;

type Inflight = Mutex<HashMap<String, watch::Receiver<Option<bool>>>>;

pub struct StationValidator {
    factory: Arc<dyn EngineFactory>,
    store: Arc<dyn StationStore>,
    timeout: Duration,
    /// Latest known status per station id, ahead of whatever copy of the
    /// station a caller holds.
    statuses: Mutex<HashMap<String, ValidationStatus>>,
    inflight: Inflight,
    probe_seq: AtomicU64,
}

/// Removes the in-flight entry however the probe future ends, including
/// cancellation.  Waiters see the sender drop and report failure.
struct InflightEntry<'a> {
    inflight: &'a Inflight,
    id: String,
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.inflight.lock() {
            map.remove(&self.id);
        }
    }
}

impl StationValidator {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        store: Arc<dyn StationStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            factory,
            store,
            timeout,
            statuses: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            probe_seq: AtomicU64::new(1),
        }
    }

    pub fn status_of(&self, station: &Station) -> ValidationStatus {
        self.statuses
            .lock()
            .ok()
            .and_then(|map| map.get(&station.id).copied())
            .unwrap_or(station.validation_status)
    }

    /// Record a status in the cache and the station store.
    pub async fn mark(&self, id: &str, status: ValidationStatus) {
        if let Ok(mut map) = self.statuses.lock() {
            map.insert(id.to_string(), status);
        }
        if let Err(e) = self.store.set_validation_status(id, status).await {
            warn!("Failed to persist validation status for {}: {}", id, e);
        }
    }

    /// Whether the stream plays.  Known-working stations return true without
    /// probing.
    pub async fn validate(&self, station: &Station) -> bool {
        if self.status_of(station) == ValidationStatus::Working {
            return true;
        }

        let (tx, existing) = {
            let mut map = match self.inflight.lock() {
                Ok(map) => map,
                Err(_) => return false,
            };
            match map.get(&station.id) {
                Some(rx) => (None, Some(rx.clone())),
                None => {
                    let (tx, rx) = watch::channel(None);
                    map.insert(station.id.clone(), rx);
                    (Some(tx), None)
                }
            }
        };

        if let Some(mut rx) = existing {
            debug!("Joining in-flight validation of {}", station.name);
            let joined = match rx.wait_for(Option::is_some).await {
                Ok(result) => (*result).unwrap_or(false),
                Err(_) => false,
            };
            return joined;
        }

        let _entry = InflightEntry {
            inflight: &self.inflight,
            id: station.id.clone(),
        };
        let ok = self.probe(station).await;
        if let Some(tx) = tx {
            let _ = tx.send(Some(ok));
        }
        ok
    }

    async fn probe(&self, station: &Station) -> bool {
        self.mark(&station.id, ValidationStatus::Validating).await;
        info!("Validating station: {}", station.name);

        let label = format!("probe-{}", self.probe_seq.fetch_add(1, Ordering::Relaxed));
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let engine = match self.factory.create(&label, events_tx).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Could not start probe for {}: {}", station.name, e);
                self.mark(&station.id, ValidationStatus::Failed).await;
                return false;
            }
        };

        let token = TransitionToken(1);
        let outcome = tokio::time::timeout(self.timeout, async {
            engine.set_gain(0.0).await?;
            engine.load(&station.url, token).await?;
            engine.play().await?;
            while let Some(event) = events_rx.recv().await {
                if event.token != token {
                    continue;
                }
                match event.kind {
                    EngineEventKind::Ready => return Ok(true),
                    EngineEventKind::Error(message) => {
                        debug!("Probe {} error: {}", label, message);
                        return Ok(false);
                    }
                    EngineEventKind::Ended => return Ok(false),
                    _ => {}
                }
            }
            Ok::<bool, crate::engine::EngineError>(false)
        })
        .await;

        engine.release().await;

        let ok = match outcome {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                warn!("Probe for {} failed: {}", station.name, e);
                false
            }
            Err(_) => {
                warn!(
                    "Validation of {} timed out after {:?}",
                    station.name, self.timeout
                );
                false
            }
        };

        let status = if ok {
            ValidationStatus::Working
        } else {
            ValidationStatus::Failed
        };
        self.mark(&station.id, status).await;
        info!("Station {} validated: {:?}", station.name, status);
        ok
    }
}
