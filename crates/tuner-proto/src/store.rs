//! Persistence seams for the orchestrator: the saved station list and the
//! small settings file.  Both are JSON on disk; an ephemeral variant without a
//! backing file exists for embedding and tests.

use crate::protocol::{Station, ValidationStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("station not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Ordered list of saved stations.
#[async_trait]
pub trait StationStore: Send + Sync {
    /// Saved stations ordered by `position`.
    async fn stations(&self) -> Vec<Station>;

    async fn station(&self, id: &str) -> Option<Station> {
        self.stations().await.into_iter().find(|s| s.id == id)
    }

    /// Record a validation outcome.  Unsaved stations are ignored.
    async fn set_validation_status(&self, id: &str, status: ValidationStatus) -> Result<()>;

    /// Append a station, or replace the saved entry with the same id.
    async fn save_station(&self, station: Station) -> Result<()>;

    /// Returns whether a station was removed.
    async fn remove_station(&self, id: &str) -> Result<bool>;

    /// Reassign positions following `ids`; saved stations not listed keep
    /// their relative order after the listed ones.
    async fn reorder(&self, ids: &[String]) -> Result<()>;
}

/// Persisted settings (volume multiplier, last station).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersistentState {
    #[serde(default)]
    pub last_station_id: Option<String>,
    #[serde(default)]
    pub volume: Option<f32>,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> PersistentState;
    async fn set_volume(&self, volume: f32) -> Result<()>;
    async fn set_last_station(&self, id: Option<&str>) -> Result<()>;
}

// ── JSON-backed implementations ───────────────────────────────────────────────

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

pub struct JsonStationStore {
    path: Option<PathBuf>,
    stations: RwLock<Vec<Station>>,
}

impl JsonStationStore {
    /// Open the saved list at `path`.  A missing or unreadable file yields an
    /// empty list.
    pub fn open(path: PathBuf) -> Self {
        let mut stations: Vec<Station> = read_json(&path).unwrap_or_default();
        stations.sort_by_key(|s| s.position);
        debug!("Station store {}: {} stations", path.display(), stations.len());
        Self {
            path: Some(path),
            stations: RwLock::new(stations),
        }
    }

    /// In-memory store that never touches disk.
    pub fn ephemeral(stations: Vec<Station>) -> Self {
        let mut stations = stations;
        renumber(&mut stations);
        Self {
            path: None,
            stations: RwLock::new(stations),
        }
    }

    /// Replace the whole list (used to seed a fresh install).
    pub async fn replace_all(&self, stations: Vec<Station>) -> Result<()> {
        let mut guard = self.stations.write().await;
        *guard = stations;
        renumber(&mut guard);
        self.persist(&guard).await
    }

    async fn persist(&self, stations: &[Station]) -> Result<()> {
        match &self.path {
            Some(path) => write_json(path, &stations).await,
            None => Ok(()),
        }
    }
}

fn renumber(stations: &mut [Station]) {
    for (position, station) in stations.iter_mut().enumerate() {
        station.position = position;
    }
}

#[async_trait]
impl StationStore for JsonStationStore {
    async fn stations(&self) -> Vec<Station> {
        self.stations.read().await.clone()
    }

    async fn set_validation_status(&self, id: &str, status: ValidationStatus) -> Result<()> {
        let mut guard = self.stations.write().await;
        let Some(station) = guard.iter_mut().find(|s| s.id == id) else {
            return Ok(());
        };
        if station.validation_status == status {
            return Ok(());
        }
        station.validation_status = status;
        self.persist(&guard).await
    }

    async fn save_station(&self, station: Station) -> Result<()> {
        let mut guard = self.stations.write().await;
        match guard.iter_mut().find(|s| s.id == station.id) {
            Some(existing) => {
                let position = existing.position;
                *existing = Station { position, ..station };
            }
            None => {
                let position = guard.len();
                guard.push(Station { position, ..station });
            }
        }
        self.persist(&guard).await
    }

    async fn remove_station(&self, id: &str) -> Result<bool> {
        let mut guard = self.stations.write().await;
        let before = guard.len();
        guard.retain(|s| s.id != id);
        if guard.len() == before {
            return Ok(false);
        }
        renumber(&mut guard);
        self.persist(&guard).await?;
        Ok(true)
    }

    async fn reorder(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.stations.write().await;
        if let Some(missing) = ids.iter().find(|id| !guard.iter().any(|s| &s.id == *id)) {
            return Err(StoreError::NotFound(missing.clone()));
        }
        guard.sort_by_key(|s| {
            ids.iter()
                .position(|id| *id == s.id)
                .unwrap_or(ids.len() + s.position)
        });
        renumber(&mut guard);
        self.persist(&guard).await
    }
}

pub struct JsonSettingsStore {
    path: Option<PathBuf>,
    state: RwLock<PersistentState>,
}

impl JsonSettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let state = read_json(&path).unwrap_or_default();
        Self {
            path: Some(path),
            state: RwLock::new(state),
        }
    }

    pub fn ephemeral(state: PersistentState) -> Self {
        Self {
            path: None,
            state: RwLock::new(state),
        }
    }

    async fn persist(&self, state: &PersistentState) -> Result<()> {
        match &self.path {
            Some(path) => write_json(path, state).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> PersistentState {
        self.state.read().await.clone()
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.volume = Some(volume);
        self.persist(&guard).await
    }

    async fn set_last_station(&self, id: Option<&str>) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.last_station_id = id.map(str::to_string);
        self.persist(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str) -> Station {
        Station::new(id, id.to_uppercase(), format!("http://{id}.example/live"))
    }

    #[tokio::test]
    async fn save_replaces_in_place() {
        let store = JsonStationStore::ephemeral(vec![station("a"), station("b")]);
        let mut renamed = station("a");
        renamed.name = "Renamed".into();
        store.save_station(renamed).await.unwrap();
        store.save_station(station("c")).await.unwrap();

        let all = store.stations().await;
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Renamed", "B", "C"]);
        assert_eq!(all[2].position, 2);
    }

    #[tokio::test]
    async fn reorder_moves_listed_first() {
        let store = JsonStationStore::ephemeral(vec![station("a"), station("b"), station("c")]);
        store.reorder(&["c".to_string()]).await.unwrap();
        let ids: Vec<_> = store.stations().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let err = store.reorder(&["nope".to_string()]).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn validation_status_ignores_unsaved() {
        let store = JsonStationStore::ephemeral(vec![station("a")]);
        store
            .set_validation_status("zzz", ValidationStatus::Failed)
            .await
            .unwrap();
        store
            .set_validation_status("a", ValidationStatus::Working)
            .await
            .unwrap();
        assert_eq!(
            store.station("a").await.unwrap().validation_status,
            ValidationStatus::Working
        );
    }

    #[tokio::test]
    async fn remove_renumbers() {
        let store = JsonStationStore::ephemeral(vec![station("a"), station("b"), station("c")]);
        assert!(store.remove_station("a").await.unwrap());
        assert!(!store.remove_station("a").await.unwrap());
        let all = store.stations().await;
        assert_eq!(all[0].id, "b");
        assert_eq!(all[0].position, 0);
    }
}
