//! Template resolver (C3, §4.3): cache-through lookup that serves stale
//! data when the store's circuit breaker is OPEN.

use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::cache::CacheClient;
use crate::error::{Error, Result};
use crate::store::{Template, TemplateRepository};

const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(3600);
const DB_RESOURCE: &str = "db";

fn cache_key(code: &str, language: &str, version: Option<i32>) -> String {
    match version {
        Some(v) => format!("template:{code}:{language}:{v}"),
        None => format!("template:{code}:{language}:latest"),
    }
}

#[derive(Clone)]
pub struct TemplateResolver {
    cache: CacheClient,
    breaker: CircuitBreaker,
    repo: TemplateRepository,
}

impl TemplateResolver {
    pub fn new(cache: CacheClient, breaker: CircuitBreaker, repo: TemplateRepository) -> Self {
        Self {
            cache,
            breaker,
            repo,
        }
    }

    /// `resolve(code, language, version?)` per §4.3's five-step algorithm.
    pub async fn resolve(
        &self,
        code: &str,
        language: &str,
        version: Option<i32>,
    ) -> Result<Template> {
        let key = cache_key(code, language, version);

        if let Some(bytes) = self.cache.get(&key).await.unwrap_or(None) {
            if let Ok(template) = serde_json::from_slice::<Template>(&bytes) {
                return Ok(template);
            }
        }

        if !self.breaker.allow(DB_RESOURCE).await.unwrap_or(true) {
            return self.newest_cached(code, language).await;
        }

        let result = match version {
            Some(v) => self.repo.find_version(code, language, v).await,
            None => self.repo.find_latest(code, language).await,
        };

        match result {
            Ok(template) => {
                let _ = self.breaker.record_success(DB_RESOURCE).await;
                self.populate_cache(&template).await;
                Ok(template)
            }
            Err(Error::NotFound(_)) => {
                let _ = self.breaker.record_success(DB_RESOURCE).await;
                Err(Error::NotFound(format!("{code}:{language}")))
            }
            Err(e) => {
                let _ = self.breaker.record_failure(DB_RESOURCE).await;
                tracing::warn!(code, language, error = %e, "template store query failed");
                Err(Error::Unavailable("template store unavailable".into()))
            }
        }
    }

    async fn populate_cache(&self, template: &Template) {
        if let Ok(bytes) = serde_json::to_vec(template) {
            let versioned = cache_key(&template.code, &template.language, Some(template.version));
            let latest = cache_key(&template.code, &template.language, None);
            let _ = self.cache.set(&versioned, &bytes, Some(TEMPLATE_CACHE_TTL)).await;
            let _ = self.cache.set(&latest, &bytes, Some(TEMPLATE_CACHE_TTL)).await;
        }
    }

    /// Breaker-OPEN fallback: serve the newest cached version for
    /// `(code, language, *)` if any exists, else `Unavailable`.
    async fn newest_cached(&self, code: &str, language: &str) -> Result<Template> {
        let pattern = format!("template:{code}:{language}:*");
        let keys = self.cache.scan(&pattern).await.unwrap_or_default();

        let mut best: Option<Template> = None;
        for key in keys {
            if let Some(bytes) = self.cache.get(&key).await.unwrap_or(None) {
                if let Ok(template) = serde_json::from_slice::<Template>(&bytes) {
                    if best.as_ref().map(|b| template.version > b.version).unwrap_or(true) {
                        best = Some(template);
                    }
                }
            }
        }

        best.ok_or_else(|| Error::Unavailable("template store unavailable and no cached copy".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_uses_latest_sentinel_when_version_absent() {
        assert_eq!(cache_key("welcome", "en", None), "template:welcome:en:latest");
        assert_eq!(cache_key("welcome", "en", Some(3)), "template:welcome:en:3");
    }
}
