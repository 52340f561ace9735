//! Provider model catalog with a time-bounded cache.
//!
//! The cache is an explicit value + timestamp + TTL object held behind
//! the catalog handle — no ambient global. It is advisory: a caller may
//! force a refresh, and a failed refresh falls back to stale data, since
//! catalog staleness only affects selection quality, not correctness.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DeliberationError, DeliberationResult};

/// How long a fetched catalog stays fresh.
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60 * 60);

/// One backend in the provider catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    /// Provider model identifier (e.g. `anthropic/claude-3.5-sonnet`).
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Provider derived from the id prefix (e.g. `Anthropic`).
    pub provider: String,
}

/// Cached catalog value with its fetch timestamp.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    pub models: Vec<ModelInfo>,
    pub fetched_at: Instant,
}

impl CatalogCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPayload {
    #[serde(default)]
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: String,
    name: Option<String>,
}

/// Handle to the upstream model catalog.
pub struct ModelCatalog {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    ttl: Duration,
    cache: Mutex<Option<CatalogCache>>,
}

impl ModelCatalog {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            ttl: DEFAULT_CATALOG_TTL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// List available models, serving the cache while fresh. A failed
    /// refresh serves stale data when any is held; with nothing cached
    /// it is a hard failure.
    pub async fn available_models(&self, force_refresh: bool) -> DeliberationResult<Vec<ModelInfo>> {
        let mut cache = self.cache.lock().await;

        if !force_refresh {
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(self.ttl) {
                    debug!(models = cached.models.len(), "serving fresh catalog cache");
                    return Ok(cached.models.clone());
                }
            }
        }

        match self.fetch().await {
            Ok(models) => {
                *cache = Some(CatalogCache {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(models)
            }
            Err(e) => {
                if let Some(stale) = cache.as_ref() {
                    warn!(error = %e, "catalog refresh failed; serving stale data");
                    return Ok(stale.models.clone());
                }
                warn!(error = %e, "catalog fetch failed with no cache to fall back on");
                Err(DeliberationError::EmptyCatalog)
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<ModelInfo>, reqwest::Error> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;

        let payload: CatalogPayload = response.json().await?;
        Ok(payload
            .data
            .into_iter()
            .filter(|entry| !entry.id.is_empty())
            .map(|entry| {
                let provider = provider_from_id(&entry.id);
                let name = entry.name.unwrap_or_else(|| entry.id.clone());
                ModelInfo {
                    id: entry.id,
                    name,
                    provider,
                }
            })
            .collect())
    }
}

/// Derive a provider label from an `<provider>/<model>` identifier.
pub fn provider_from_id(id: &str) -> String {
    let prefix = match id.split_once('/') {
        Some((provider, _)) => provider,
        None => return "Unknown".to_string(),
    };
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_derived_from_id_prefix() {
        assert_eq!(provider_from_id("openai/gpt-4o"), "Openai");
        assert_eq!(provider_from_id("x-ai/grok-4"), "X-ai");
        assert_eq!(provider_from_id("standalone-model"), "Unknown");
    }

    #[test]
    fn cache_freshness_respects_ttl() {
        let cache = CatalogCache {
            models: vec![],
            fetched_at: Instant::now(),
        };
        assert!(cache.is_fresh(Duration::from_secs(60)));
        assert!(!cache.is_fresh(Duration::ZERO));
    }
}
