//! radio-browser catalog: search and browse over the mirror pool.
//!
//! [`RadioBrowserClient`] returns errors; [`Catalog`] is what the rest of the
//! daemon uses, and turns an exhausted mirror pool into an empty result.

use crate::failover::{CatalogError, FailoverClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tuner_proto::config::CatalogConfig;
use tuner_proto::protocol::Station;

#[derive(Debug, Deserialize)]
struct RbStation {
    stationuuid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_resolved: String,
    #[serde(default)]
    favicon: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    countrycode: String,
    #[serde(default)]
    codec: String,
    #[serde(default)]
    bitrate: u32,
    #[serde(default)]
    votes: i64,
    #[serde(default)]
    language: String,
}

impl RbStation {
    fn into_station(self) -> Option<Station> {
        let url = if self.url.trim().is_empty() {
            self.url_resolved.trim().to_string()
        } else {
            self.url.trim().to_string()
        };
        let name = self.name.trim().to_string();
        if name.is_empty() || url.is_empty() {
            return None;
        }
        Some(Station {
            catalog_uuid: Some(self.stationuuid.clone()),
            id: self.stationuuid,
            name,
            url,
            image_url: self.favicon,
            country: self.countrycode.trim().to_string(),
            codec: self.codec.trim().to_string(),
            bitrate: self.bitrate,
            language: self.language.trim().to_string(),
            tags: self
                .tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            votes: self.votes,
            ..Station::default()
        })
    }
}

/// Country, language or tag entry with its station count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogFacet {
    pub name: String,
    #[serde(default, rename = "iso_3166_1", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub stationcount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

impl SearchQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country_code: None,
            language: None,
            tag: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("name", self.name.clone()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("hidebroken", "true".to_string()),
        ];
        if let Some(code) = &self.country_code {
            params.push(("countrycode", code.clone()));
        }
        if let Some(language) = &self.language {
            params.push(("language", language.clone()));
        }
        if let Some(tag) = &self.tag {
            params.push(("tag", tag.clone()));
        }
        params
    }
}

pub struct RadioBrowserClient {
    failover: FailoverClient,
}

impl RadioBrowserClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Ok(Self {
            failover: FailoverClient::new(config)?,
        })
    }

    pub fn failover(&self) -> &FailoverClient {
        &self.failover
    }

    async fn stations(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Station>, CatalogError> {
        let raw: Vec<RbStation> = self.failover.get_json(path, query).await?;
        let total = raw.len();
        let stations: Vec<Station> = raw.into_iter().filter_map(RbStation::into_station).collect();
        if stations.len() < total {
            debug!("Dropped {} catalog entries without name or URL", total - stations.len());
        }
        Ok(stations)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Station>, CatalogError> {
        self.stations("json/stations/search", &query.params()).await
    }

    pub async fn top_voted(&self, limit: u32) -> Result<Vec<Station>, CatalogError> {
        self.stations(&format!("json/stations/topvote/{limit}"), &[])
            .await
    }

    pub async fn by_uuid(&self, uuid: &str) -> Result<Option<Station>, CatalogError> {
        let stations = self
            .stations("json/stations/byuuid", &[("uuids", uuid.to_string())])
            .await?;
        Ok(stations.into_iter().find(|s| s.id == uuid))
    }

    pub async fn by_country(&self, code: &str, limit: u32) -> Result<Vec<Station>, CatalogError> {
        self.stations(
            &format!("json/stations/bycountrycodeexact/{code}"),
            &[("limit", limit.to_string())],
        )
        .await
    }

    pub async fn countries(&self) -> Result<Vec<CatalogFacet>, CatalogError> {
        self.failover.get_json("json/countries", &[]).await
    }

    pub async fn languages(&self) -> Result<Vec<CatalogFacet>, CatalogError> {
        self.failover.get_json("json/languages", &[]).await
    }

    pub async fn tags(&self) -> Result<Vec<CatalogFacet>, CatalogError> {
        self.failover
            .get_json(
                "json/tags",
                &[
                    ("order", "stationcount".to_string()),
                    ("reverse", "true".to_string()),
                    ("limit", "500".to_string()),
                ],
            )
            .await
    }

    /// Report a play to the catalog's popularity counter.
    pub async fn track_click(&self, uuid: &str) -> Result<(), CatalogError> {
        let _: serde_json::Value = self
            .failover
            .get_json(&format!("json/url/{uuid}"), &[])
            .await?;
        Ok(())
    }
}

/// Catalog access for handlers: exhausted mirrors become empty results.
pub struct Catalog {
    client: RadioBrowserClient,
}

fn or_empty<T: Default>(what: &str, result: Result<T, CatalogError>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Catalog {} failed: {}", what, e);
        T::default()
    })
}

impl Catalog {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Ok(Self {
            client: RadioBrowserClient::new(config)?,
        })
    }

    pub fn client(&self) -> &RadioBrowserClient {
        &self.client
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<Station> {
        or_empty("search", self.client.search(query).await)
    }

    pub async fn top_voted(&self, limit: u32) -> Vec<Station> {
        or_empty("top stations", self.client.top_voted(limit).await)
    }

    pub async fn by_uuid(&self, uuid: &str) -> Option<Station> {
        or_empty("station lookup", self.client.by_uuid(uuid).await)
    }

    pub async fn by_country(&self, code: &str, limit: u32) -> Vec<Station> {
        or_empty("country listing", self.client.by_country(code, limit).await)
    }

    pub async fn countries(&self) -> Vec<CatalogFacet> {
        or_empty("countries", self.client.countries().await)
    }

    pub async fn languages(&self) -> Vec<CatalogFacet> {
        or_empty("languages", self.client.languages().await)
    }

    pub async fn tags(&self) -> Vec<CatalogFacet> {
        or_empty("tags", self.client.tags().await)
    }

    pub async fn track_click(&self, uuid: &str) {
        or_empty("click tracking", self.client.track_click(uuid).await)
    }
}
