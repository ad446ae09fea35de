//! First-run station list: used only when the saved list is empty.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tuner_proto::config::Config;
use tuner_proto::protocol::Station;
use tuner_proto::stations::{load_stations_from_m3u, load_stations_from_toml, parse_m3u_from_str};

/// Walk the seed sources in priority order and return the first list found:
/// the configured TOML, a `stations.toml` beside the executable or in the
/// working directory, then the configured m3u URL or file.
pub async fn seed_stations(config: &Config) -> Vec<Station> {
    let mut candidates = vec![config.stations.stations_toml.clone()];
    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        candidates.push(dir.join("stations.toml"));
    }
    candidates.push(PathBuf::from("stations.toml"));

    for path in candidates.iter().filter(|p| p.exists()) {
        match load_stations_from_toml(path) {
            Ok(stations) => {
                info!("Loaded {} stations from {}", stations.len(), path.display());
                return stations;
            }
            Err(e) => warn!("Failed to parse {}: {}", path.display(), e),
        }
    }

    let source = config.stations.m3u_url.trim();
    if source.is_empty() {
        info!("No station source available, starting with empty list");
        return Vec::new();
    }

    info!("Loading stations from m3u: {}", source);
    let loaded = if source.starts_with("http://") || source.starts_with("https://") {
        fetch_m3u_url(source).await
    } else {
        load_stations_from_m3u(Path::new(source))
    };
    match loaded {
        Ok(stations) => {
            info!("Loaded {} stations from m3u", stations.len());
            stations
        }
        Err(e) => {
            warn!("Failed to load m3u stations: {}", e);
            Vec::new()
        }
    }
}

async fn fetch_m3u_url(url: &str) -> anyhow::Result<Vec<Station>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_m3u_from_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_toml_wins() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("stations.toml");
        std::fs::write(
            &toml_path,
            r#"
            [[station]]
            name = "Alpha"
            url = "http://alpha.example/live"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.stations.stations_toml = toml_path;
        let stations = seed_stations(&config).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].name, "Alpha");
    }

    #[tokio::test]
    async fn m3u_file_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let m3u = dir.path().join("list.m3u");
        std::fs::write(
            &m3u,
            "#EXTM3U\n#EXTINF:-1,Beta\nhttp://beta.example/live\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.stations.stations_toml = dir.path().join("missing.toml");
        config.stations.m3u_url = m3u.display().to_string();
        let stations = seed_stations(&config).await;
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].url, "http://beta.example/live");
    }
}
