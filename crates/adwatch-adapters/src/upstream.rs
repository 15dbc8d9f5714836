use std::path::PathBuf;
use std::sync::Arc;

use adwatch_core::Platform;
use adwatch_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{AdapterError, AdapterErrorKind};

pub const DEFAULT_API_BASE_URL: &str = "https://api.scrapecreators.com/v1";

/// Where adapters get response bodies from: the live ad-library API, or
/// recorded responses under `<root>/<platform>/sample.json`.
#[derive(Debug, Clone)]
pub enum Upstream {
    Http {
        fetcher: Arc<HttpFetcher>,
        base_url: String,
        api_key: Option<String>,
    },
    Fixtures {
        root: PathBuf,
    },
}

impl Upstream {
    pub fn http(fetcher: Arc<HttpFetcher>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Upstream::Http {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn fixtures(root: impl Into<PathBuf>) -> Self {
        Upstream::Fixtures { root: root.into() }
    }

    /// The configured credential, used to scrub payload snapshots.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Upstream::Http { api_key, .. } => api_key.as_deref(),
            Upstream::Fixtures { .. } => None,
        }
    }

    pub(crate) async fn get(
        &self,
        platform: Platform,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, AdapterError> {
        match self {
            Upstream::Http {
                fetcher,
                base_url,
                api_key,
            } => {
                let Some(api_key) = api_key else {
                    return Err(AdapterError::new(
                        AdapterErrorKind::AuthFailure,
                        "no API key configured for the ad-library API",
                    ));
                };
                let url = format!("{base_url}/{}", endpoint.trim_start_matches('/'));
                let headers = [
                    ("x-api-key", api_key.clone()),
                    ("accept", "application/json".to_string()),
                ];
                Ok(fetcher
                    .get_json(platform.as_str(), &url, query, &headers)
                    .await?)
            }
            Upstream::Fixtures { root } => {
                let path = root.join(platform.as_str()).join("sample.json");
                debug!(path = %path.display(), "reading recorded response");
                let text = tokio::fs::read_to_string(&path).await.map_err(|err| {
                    AdapterError::new(
                        AdapterErrorKind::Upstream,
                        format!("reading {}: {err}", path.display()),
                    )
                })?;
                serde_json::from_str(&text).map_err(|err| {
                    AdapterError::malformed(format!("parsing {}: {err}", path.display()))
                })
            }
        }
    }
}
