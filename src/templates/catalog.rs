//! Template catalog writer (C4, §4.4): create/update/delete with monotonic
//! versioning, placeholder validation, cache invalidation, and
//! `template.updated` event publication.

use chrono::Utc;

use crate::broker::{BrokerClient, TemplateUpdatedEvent, EXCHANGE, TEMPLATE_UPDATED_ROUTING_KEY};
use crate::cache::CacheClient;
use crate::error::{Error, Result};
use crate::render::extract_placeholders;
use crate::store::{Template, TemplateDto, TemplateRepository};

#[derive(Clone)]
pub struct TemplateCatalog {
    cache: CacheClient,
    broker: BrokerClient,
    repo: TemplateRepository,
}

impl TemplateCatalog {
    pub fn new(cache: CacheClient, broker: BrokerClient, repo: TemplateRepository) -> Self {
        Self {
            cache,
            broker,
            repo,
        }
    }

    /// Validates `placeholders(content) ⊆ variables` (spec §3 invariant a).
    /// Unused declared variables are a non-fatal warning, logged but not
    /// rejected.
    fn validate_placeholders(
        content: &std::collections::HashMap<String, String>,
        variables: &[String],
    ) -> Result<()> {
        let declared: std::collections::HashSet<&str> =
            variables.iter().map(String::as_str).collect();

        for (field, text) in content {
            for placeholder in extract_placeholders(text) {
                if !declared.contains(placeholder.as_str()) {
                    return Err(Error::Validation(format!(
                        "field {field} references undeclared variable {placeholder}"
                    )));
                }
            }
        }

        let used: std::collections::HashSet<String> = content
            .values()
            .flat_map(|text| extract_placeholders(text))
            .collect();
        for unused in declared.iter().filter(|v| !used.contains(**v)) {
            tracing::warn!(variable = unused, "declared template variable is never used");
        }

        Ok(())
    }

    /// `create(dto)`: requires no existing row for `(code, language)`,
    /// inserts `version = 1`, populates both cache entries, emits the
    /// `template.updated` event.
    pub async fn create(&self, dto: TemplateDto) -> Result<Template> {
        let content = dto.content.ok_or_else(|| Error::Validation("content is required".into()))?;
        let variables = dto.variables.unwrap_or_default();
        let template_type = dto.template_type.unwrap_or_else(|| "email".into());
        Self::validate_placeholders(&content, &variables)?;

        if self.repo.max_version(&dto.code, &dto.language).await?.is_some() {
            return Err(Error::Conflict(format!(
                "template {} ({}) already exists",
                dto.code, dto.language
            )));
        }

        let template = self
            .repo
            .insert(&dto.code, &template_type, &dto.language, 1, &content, &variables)
            .await?;

        self.populate_cache(&template).await;
        self.emit_updated(&template).await;
        Ok(template)
    }

    /// `update(code, dto)`: last-write-wins merge of provided fields onto
    /// the latest row, re-validated, inserted as `version = latest + 1`.
    /// Prior rows are never mutated.
    pub async fn update(&self, code: &str, dto: TemplateDto) -> Result<Template> {
        let latest = self.repo.find_latest(code, &dto.language).await?;

        let content = dto.content.unwrap_or_else(|| latest.content.0.clone());
        let variables = dto.variables.unwrap_or_else(|| latest.variables.0.clone());
        let template_type = dto.template_type.unwrap_or(latest.template_type.clone());
        Self::validate_placeholders(&content, &variables)?;

        let next_version = latest.version + 1;
        let template = self
            .repo
            .insert(code, &template_type, &dto.language, next_version, &content, &variables)
            .await?;

        self.invalidate(code, &dto.language).await;
        self.populate_cache(&template).await;
        self.emit_updated(&template).await;
        Ok(template)
    }

    /// `delete(code, language)`: removes every row; a subsequent `resolve`
    /// then returns `NotFound`.
    pub async fn delete(&self, code: &str, language: &str) -> Result<()> {
        self.repo.delete_all(code, language).await?;
        self.invalidate(code, language).await;
        Ok(())
    }

    /// `GET /templates?page=&limit=` (§6), one row per `(code, language)`
    /// family at its latest version.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Template>> {
        self.repo.list_latest(limit, offset).await
    }

    async fn populate_cache(&self, template: &Template) {
        if let Ok(bytes) = serde_json::to_vec(template) {
            let versioned = format!("template:{}:{}:{}", template.code, template.language, template.version);
            let latest = format!("template:{}:{}:latest", template.code, template.language);
            let ttl = Some(std::time::Duration::from_secs(3600));
            let _ = self.cache.set(&versioned, &bytes, ttl).await;
            let _ = self.cache.set(&latest, &bytes, ttl).await;
        }
    }

    async fn invalidate(&self, code: &str, language: &str) {
        let pattern = format!("template:{code}:{language}:*");
        let _ = self.cache.delete_matching(&pattern).await;
    }

    async fn emit_updated(&self, template: &Template) {
        let event = TemplateUpdatedEvent {
            code: template.code.clone(),
            version: template.version,
            timestamp: Utc::now().to_rfc3339(),
        };
        if let Ok(payload) = serde_json::to_vec(&event) {
            if let Err(e) = self.broker.publish(TEMPLATE_UPDATED_ROUTING_KEY, &payload).await {
                tracing::warn!(error = %e, exchange = EXCHANGE, "failed to publish template.updated event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rejects_placeholder_not_in_variables() {
        let mut content = HashMap::new();
        content.insert("body".to_string(), "hi {{name}}".to_string());
        let variables = vec![]; // "name" not declared
        let result = TemplateCatalog::validate_placeholders(&content, &variables);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_subset_placeholders() {
        let mut content = HashMap::new();
        content.insert("body".to_string(), "hi {{name}}".to_string());
        let variables = vec!["name".to_string(), "unused".to_string()];
        assert!(TemplateCatalog::validate_placeholders(&content, &variables).is_ok());
    }
}
