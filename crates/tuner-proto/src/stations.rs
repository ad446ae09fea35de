//! Seed station lists: m3u playlists and `[[station]]` TOML files.

use crate::protocol::Station;
use sha2::{Digest, Sha256};

/// Derive a stable station id from its stream URL: the first 16 hex chars
/// of its SHA-256.  Ids are persisted, so this must never change.
pub fn station_id_for_url(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.trim().as_bytes()));
    digest[..16].to_string()
}

pub fn parse_m3u_from_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let mut stations = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let name = pending_name.take().unwrap_or_else(|| url.clone());

        stations.push(Station {
            id: station_id_for_url(&url),
            name,
            position: stations.len(),
            url,
            ..Station::default()
        });
    }

    Ok(stations)
}

pub fn load_stations_from_m3u(path: &std::path::Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_m3u_from_str(&content)
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// Kept separate from `Station` so the TOML schema can diverge from the wire
/// protocol struct without breaking either.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    #[serde(default)]
    id: Option<String>,
    name: String,
    url: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub fn load_stations_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .enumerate()
        .map(|(position, s)| Station {
            id: s.id.unwrap_or_else(|| station_id_for_url(&s.url)),
            name: s.name,
            url: s.url,
            image_url: s.image_url,
            country: s.country,
            language: s.language,
            tags: s.tags,
            position,
            ..Station::default()
        })
        .collect();
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn m3u_names_come_from_extinf() {
        let stations = parse_m3u_from_str(
            "#EXTM3U\n#EXTINF:-1,Jazz FM\nhttp://jazz.example/live\n\nhttp://bare.example/stream\n",
        )
        .unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].name, "Jazz FM");
        assert_eq!(stations[0].position, 0);
        assert_eq!(stations[1].name, "http://bare.example/stream");
        assert_eq!(stations[1].position, 1);
        assert_eq!(stations[1].id, station_id_for_url("http://bare.example/stream"));
    }

    #[test]
    fn url_ids_are_pinned() {
        assert_eq!(station_id_for_url("http://jazz.example/live"), "60b88e076abc5a66");
        assert_eq!(
            station_id_for_url("  http://jazz.example/live\n"),
            "60b88e076abc5a66"
        );
    }

    #[test]
    fn toml_ids_default_to_url_hash() {
        let stations = parse_stations_from_toml_str(
            r#"
            [[station]]
            id = "fip"
            name = "FIP"
            url = "https://icecast.radiofrance.fr/fip-hifi.aac"
            tags = ["eclectic"]

            [[station]]
            name = "SomaFM Groove Salad"
            url = "https://ice1.somafm.com/groovesalad-128-mp3"
            "#,
        )
        .unwrap();
        assert_eq!(stations[0].id, "fip");
        assert_eq!(stations[0].tags, vec!["eclectic"]);
        assert_eq!(
            stations[1].id,
            station_id_for_url("https://ice1.somafm.com/groovesalad-128-mp3")
        );
        assert_eq!(stations[1].position, 1);
    }
}
