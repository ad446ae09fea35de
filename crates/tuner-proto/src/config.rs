use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub stations: StationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Persisted settings (volume, last station).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Saved station list with validation status.
    #[serde(default = "default_stations_file")]
    pub stations_file: PathBuf,
    /// Explicit mpv executable; otherwise found beside the daemon or on PATH.
    #[serde(default)]
    pub mpv_binary: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Tuning for the playback orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_min_volume")]
    pub min_volume: f32,
    #[serde(default = "default_max_volume")]
    pub max_volume: f32,
    /// Probe stations that are not known to work before switching to them.
    #[serde(default = "default_true")]
    pub validate_before_play: bool,
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_engine_retry_delay_ms")]
    pub engine_retry_delay_ms: u64,
    /// Same-item retries after an engine error during playback.  Unset means
    /// retry forever.
    #[serde(default)]
    pub max_engine_retries: Option<u32>,
    #[serde(default = "default_fade_duration_ms")]
    pub fade_duration_ms: u64,
    #[serde(default = "default_fade_steps")]
    pub fade_steps: u32,
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,
}

/// Radio-browser catalog mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Round-robin name queried to discover the mirror list.
    #[serde(default = "default_discovery_host")]
    pub discovery_host: String,
    /// Used when discovery fails or yields nothing.
    #[serde(default = "default_fallback_host")]
    pub fallback_host: String,
    /// Discovered hosts outside this domain are dropped.
    #[serde(default = "default_canonical_domain")]
    pub canonical_domain: String,
    /// Static mirror list; bypasses discovery when non-empty.
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Seed sources for the saved station list, read when no saved list exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Path to a local TOML station file (highest priority).
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// URL or file path for an m3u station list (fallback when TOML not found).
    #[serde(default)]
    pub m3u_url: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            state_file: default_state_file(),
            stations_file: default_stations_file(),
            mpv_binary: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            min_volume: default_min_volume(),
            max_volume: default_max_volume(),
            validate_before_play: true,
            validation_timeout_secs: default_validation_timeout_secs(),
            engine_retry_delay_ms: default_engine_retry_delay_ms(),
            max_engine_retries: None,
            fade_duration_ms: default_fade_duration_ms(),
            fade_steps: default_fade_steps(),
            debounce_window_ms: default_debounce_window_ms(),
        }
    }
}

impl PlaybackConfig {
    /// Clamp into the configured range.  Never panics, even on bounds that
    /// [`validate`](Self::validate) would reject.
    pub fn clamp_volume(&self, value: f32) -> f32 {
        let lo = self.min_volume.min(self.max_volume);
        let hi = self.max_volume.max(self.min_volume);
        if value.is_nan() {
            return lo;
        }
        value.max(lo).min(hi)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let (min, max) = (self.min_volume, self.max_volume);
        if !(min.is_finite() && max.is_finite() && 0.0 <= min && min <= max) {
            anyhow::bail!(
                "playback volume bounds must satisfy 0 <= min_volume <= max_volume (got {} and {})",
                min,
                max
            );
        }
        if self.fade_steps == 0 {
            anyhow::bail!("playback.fade_steps must be at least 1");
        }
        Ok(())
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn engine_retry_delay(&self) -> Duration {
        Duration::from_millis(self.engine_retry_delay_ms)
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            discovery_host: default_discovery_host(),
            fallback_host: default_fallback_host(),
            canonical_domain: default_canonical_domain(),
            mirrors: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
            m3u_url: String::new(),
        }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_stations_file() -> PathBuf {
    platform::data_dir().join("stations.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f32 {
    0.7
}

fn default_min_volume() -> f32 {
    0.2
}

fn default_max_volume() -> f32 {
    1.0
}

fn default_validation_timeout_secs() -> u64 {
    20
}

fn default_engine_retry_delay_ms() -> u64 {
    3000
}

fn default_fade_duration_ms() -> u64 {
    600
}

fn default_fade_steps() -> u32 {
    12
}

fn default_debounce_window_ms() -> u64 {
    800
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_discovery_host() -> String {
    "all.api.radio-browser.info".to_string()
}

fn default_fallback_host() -> String {
    "de1.api.radio-browser.info".to_string()
}

fn default_canonical_domain() -> String {
    "radio-browser.info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("tuner/{}", env!("CARGO_PKG_VERSION"))
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.playback.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
