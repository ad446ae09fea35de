//! Mirror selection and retry-until-exhausted execution for the catalog API.

use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use tuner_proto::config::CatalogConfig;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("request to {host} failed: {source}")]
    Request {
        host: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{host} answered HTTP {status}")]
    Status {
        host: String,
        status: reqwest::StatusCode,
    },
    #[error("all {attempts} catalog mirrors failed, last error: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<CatalogError>,
    },
    #[error("no catalog mirrors available")]
    NoMirrors,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    name: String,
}

/// Rotating list of equivalent mirror hosts plus the shared cursor that
/// remembers the last host that answered.
pub struct EndpointPool {
    scheme: String,
    discovery_host: String,
    fallback_host: String,
    canonical_domain: String,
    http: reqwest::Client,
    hosts: OnceCell<Vec<String>>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    pub fn new(config: &CatalogConfig, http: reqwest::Client) -> Self {
        let hosts = if config.mirrors.is_empty() {
            OnceCell::new()
        } else {
            OnceCell::new_with(Some(config.mirrors.clone()))
        };
        Self {
            scheme: config.scheme.clone(),
            discovery_host: config.discovery_host.clone(),
            fallback_host: config.fallback_host.clone(),
            canonical_domain: config.canonical_domain.clone(),
            http,
            hosts,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Candidate hosts.  Discovery runs once; a failed or empty discovery
    /// yields the fallback host.  Never fails.
    pub async fn resolve(&self) -> Vec<String> {
        self.hosts.get_or_init(|| self.discover()).await.clone()
    }

    async fn discover(&self) -> Vec<String> {
        let url = format!("{}://{}/json/servers", self.scheme, self.discovery_host);
        let discovered = match self.fetch_servers(&url).await {
            Ok(entries) => filter_hosts(entries, &self.canonical_domain),
            Err(e) => {
                warn!("Catalog mirror discovery failed: {}", e);
                Vec::new()
            }
        };
        if discovered.is_empty() {
            info!("Using fallback catalog host {}", self.fallback_host);
            return vec![self.fallback_host.clone()];
        }
        info!("Discovered {} catalog mirrors", discovered.len());
        discovered
    }

    async fn fetch_servers(&self, url: &str) -> Result<Vec<ServerEntry>, reqwest::Error> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub fn base_url(&self, host: &str) -> String {
        format!("{}://{}", self.scheme, host)
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Move past `failed` unless a concurrent caller already has.
    fn advance_past(&self, failed: usize, len: usize) {
        let _ = self.cursor.compare_exchange(
            failed,
            (failed + 1) % len,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

fn filter_hosts(entries: Vec<ServerEntry>, canonical_domain: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut hosts: Vec<String> = entries
        .into_iter()
        .map(|e| e.name.trim().trim_end_matches('.').to_lowercase())
        .filter(|name| name.contains(canonical_domain))
        .filter(|name| seen.insert(name.clone()))
        .collect();
    hosts.shuffle(&mut rand::thread_rng());
    hosts
}

/// Runs one remote operation against the pool, host by host, starting at
/// the cursor.
pub struct FailoverClient {
    pool: EndpointPool,
    http: reqwest::Client,
}

impl FailoverClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(CatalogError::Client)?;
        Ok(Self {
            pool: EndpointPool::new(config, http.clone()),
            http,
        })
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// `op` receives a base URL (`scheme://host`).  Success leaves the
    /// cursor on the host that answered; each failure advances it by one,
    /// unless a concurrent call already moved it off the failed host.
    /// No host is tried twice within a call.
    pub async fn execute_with_failover<T, F, Fut>(&self, op: F) -> Result<T, CatalogError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let hosts = self.pool.resolve().await;
        let len = hosts.len().max(1);
        let start = self.pool.cursor() % len;
        let mut last = None;

        for attempt in 0..hosts.len() {
            let index = (start + attempt) % len;
            let host = &hosts[index];
            match op(self.pool.base_url(host)).await {
                Ok(value) => {
                    debug!("Catalog request served by {}", host);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Catalog mirror {} failed: {}", host, e);
                    self.pool.advance_past(index, len);
                    last = Some(e);
                }
            }
        }

        match last {
            Some(e) => Err(CatalogError::Exhausted {
                attempts: hosts.len(),
                last: Box::new(e),
            }),
            None => Err(CatalogError::NoMirrors),
        }
    }

    /// GET `path` as JSON with failover.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, CatalogError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.execute_with_failover(|base| {
            let url = format!("{}/{}", base, path.trim_start_matches('/'));
            let request = self.http.get(&url).query(query);
            async move {
                let response = request.send().await.map_err(|source| CatalogError::Request {
                    host: base.clone(),
                    source,
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(CatalogError::Status { host: base, status });
                }
                response
                    .json::<T>()
                    .await
                    .map_err(|source| CatalogError::Request { host: base, source })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<ServerEntry> {
        names
            .iter()
            .map(|n| ServerEntry {
                name: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn discovery_keeps_canonical_domain_only() {
        let mut hosts = filter_hosts(
            entries(&[
                "de1.api.radio-browser.info",
                "nl1.api.radio-browser.info.",
                "DE1.api.radio-browser.info",
                "evil.example.com",
            ]),
            "radio-browser.info",
        );
        hosts.sort();
        assert_eq!(
            hosts,
            vec!["de1.api.radio-browser.info", "nl1.api.radio-browser.info"]
        );
    }

    #[tokio::test]
    async fn static_mirrors_skip_discovery() {
        let config = CatalogConfig {
            mirrors: vec!["a.example".into(), "b.example".into()],
            ..CatalogConfig::default()
        };
        let client = FailoverClient::new(&config).unwrap();
        assert_eq!(client.pool().resolve().await, vec!["a.example", "b.example"]);
    }

    #[tokio::test]
    async fn failures_advance_cursor_once_each() {
        let config = CatalogConfig {
            mirrors: vec!["a".into(), "b".into(), "c".into()],
            ..CatalogConfig::default()
        };
        let client = FailoverClient::new(&config).unwrap();
        let tried = std::sync::Mutex::new(Vec::new());

        let result = client
            .execute_with_failover(|base| {
                tried.lock().unwrap().push(base.clone());
                async move {
                    if base.ends_with("://c") {
                        Ok(base)
                    } else {
                        Err(CatalogError::Status {
                            host: base,
                            status: reqwest::StatusCode::BAD_GATEWAY,
                        })
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "https://c");
        assert_eq!(client.pool().cursor(), 2);
        assert_eq!(tried.lock().unwrap().len(), 3);

        // The next call starts on the host that answered.
        tried.lock().unwrap().clear();
        client
            .execute_with_failover(|base| {
                tried.lock().unwrap().push(base.clone());
                async move { Ok::<_, CatalogError>(()) }
            })
            .await
            .unwrap();
        assert_eq!(*tried.lock().unwrap(), vec!["https://c".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_failures_on_one_host_advance_once() {
        let config = CatalogConfig {
            mirrors: vec!["a".into(), "b".into()],
            ..CatalogConfig::default()
        };
        let client = FailoverClient::new(&config).unwrap();
        let callers = 8;
        let all_started = tokio::sync::Barrier::new(callers);

        let calls = (0..callers).map(|_| {
            client.execute_with_failover(|base| {
                let all_started = &all_started;
                async move {
                    if base.ends_with("://a") {
                        all_started.wait().await;
                        Err(CatalogError::Status {
                            host: base,
                            status: reqwest::StatusCode::BAD_GATEWAY,
                        })
                    } else {
                        Ok(base)
                    }
                }
            })
        });
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.as_deref().ok() == Some("https://b")));
        assert_eq!(client.pool().cursor(), 1);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let config = CatalogConfig {
            mirrors: vec!["a".into(), "b".into(), "c".into()],
            ..CatalogConfig::default()
        };
        let client = FailoverClient::new(&config).unwrap();
        let calls = AtomicUsize::new(0);

        let err = client
            .execute_with_failover(|base| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<(), _>(CatalogError::Status {
                        host: base,
                        status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.pool().cursor(), 0);
        match err {
            CatalogError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, CatalogError::Status { ref host, .. } if host == "https://c"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
