//! Postgres-backed repositories for the three durable record types named in
//! spec §3: users, templates, audit log rows.
//!
//! Grounded on the donor's `database::connection_pool` pool-usage pattern;
//! the repository split itself (one struct per table, plain `sqlx::query*`
//! calls, no query builder) follows how the donor's own handlers talk to
//! its pool directly rather than through a DB-abstraction layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};

/// User preferences, cached independently under `user:preferences:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    pub email: bool,
    pub push: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
        }
    }
}

/// User record (spec §3 "User record").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub push_token: Option<String>,
    #[sqlx(json)]
    pub preferences: sqlx::types::Json<Preferences>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
enum UserBackend {
    Postgres(PgPool),
    Memory(Arc<Mutex<Vec<User>>>),
}

/// Repository for the `users` table. Backed by an in-process `Vec` via
/// [`UserRepository::in_memory`] for the `tests/` integration suite.
#[derive(Clone)]
pub struct UserRepository {
    backend: UserBackend,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: UserBackend::Postgres(pool),
        }
    }

    pub fn in_memory(seed: Vec<User>) -> Self {
        Self {
            backend: UserBackend::Memory(Arc::new(Mutex::new(seed))),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User> {
        match &self.backend {
            UserBackend::Postgres(pool) => sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("user {id}"))),
            UserBackend::Memory(users) => users
                .lock()
                .iter()
                .find(|u| u.id == id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("user {id}"))),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<User> {
        match &self.backend {
            UserBackend::Postgres(pool) => sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("user with email {email}"))),
            UserBackend::Memory(users) => users
                .lock()
                .iter()
                .find(|u| u.email == email)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("user with email {email}"))),
        }
    }
}

/// Content mapping of a template's typed fields (e.g. `subject`, `body`) to
/// free-form template strings containing `{{ident}}` placeholders.
pub type TemplateContent = HashMap<String, String>;

/// Template record (spec §3 "Template record").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub code: String,
    #[sqlx(rename = "template_type")]
    pub template_type: String,
    pub language: String,
    pub version: i32,
    #[sqlx(json)]
    pub content: sqlx::types::Json<TemplateContent>,
    #[sqlx(json)]
    pub variables: sqlx::types::Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted by create/update, before placeholder validation.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDto {
    pub code: String,
    pub template_type: Option<String>,
    pub language: String,
    pub content: Option<TemplateContent>,
    pub variables: Option<Vec<String>>,
}

#[derive(Clone)]
enum TemplateBackend {
    Postgres(PgPool),
    Memory(Arc<Mutex<Vec<Template>>>, Arc<AtomicBool>),
}

/// Repository for the `templates` table. Enforces nothing about
/// versioning itself — that invariant lives in the catalog writer (C4),
/// which is the only writer. Backed by an in-process `Vec` via
/// [`TemplateRepository::in_memory`] for the `tests/` integration suite.
#[derive(Clone)]
pub struct TemplateRepository {
    backend: TemplateBackend,
}

impl TemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: TemplateBackend::Postgres(pool),
        }
    }

    pub fn in_memory(seed: Vec<Template>) -> Self {
        Self {
            backend: TemplateBackend::Memory(Arc::new(Mutex::new(seed)), Arc::new(AtomicBool::new(false))),
        }
    }

    /// An in-process store that can be switched to failing every call, for
    /// driving the breaker (C2) through its `OPEN` transition in the
    /// `tests/` integration suite without a real database outage.
    pub fn in_memory_with_fault(seed: Vec<Template>) -> (Self, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        (
            Self {
                backend: TemplateBackend::Memory(Arc::new(Mutex::new(seed)), failing.clone()),
            },
            failing,
        )
    }

    pub async fn find_version(
        &self,
        code: &str,
        language: &str,
        version: i32,
    ) -> Result<Template> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => sqlx::query_as::<_, Template>(
                "SELECT * FROM templates WHERE code = $1 AND language = $2 AND version = $3",
            )
            .bind(code)
            .bind(language)
            .bind(version)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{code}:{language}:{version}"))),
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                templates
                    .lock()
                    .iter()
                    .find(|t| t.code == code && t.language == language && t.version == version)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("{code}:{language}:{version}")))
            }
        }
    }

    pub async fn find_latest(&self, code: &str, language: &str) -> Result<Template> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => sqlx::query_as::<_, Template>(
                "SELECT * FROM templates WHERE code = $1 AND language = $2
                 ORDER BY version DESC LIMIT 1",
            )
            .bind(code)
            .bind(language)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{code}:{language}"))),
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                templates
                    .lock()
                    .iter()
                    .filter(|t| t.code == code && t.language == language)
                    .max_by_key(|t| t.version)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("{code}:{language}")))
            }
        }
    }

    pub async fn max_version(&self, code: &str, language: &str) -> Result<Option<i32>> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => {
                let row: Option<(Option<i32>,)> = sqlx::query_as(
                    "SELECT max(version) FROM templates WHERE code = $1 AND language = $2",
                )
                .bind(code)
                .bind(language)
                .fetch_optional(pool)
                .await?;
                Ok(row.and_then(|(v,)| v))
            }
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                Ok(templates
                    .lock()
                    .iter()
                    .filter(|t| t.code == code && t.language == language)
                    .map(|t| t.version)
                    .max())
            }
        }
    }

    /// Inserts a new version row. Callers (C4) are responsible for
    /// computing the correct next version and validating placeholders
    /// before calling this.
    pub async fn insert(
        &self,
        code: &str,
        template_type: &str,
        language: &str,
        version: i32,
        content: &TemplateContent,
        variables: &[String],
    ) -> Result<Template> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => {
                let id = Uuid::new_v4();
                sqlx::query_as::<_, Template>(
                    "INSERT INTO templates (id, code, template_type, language, version, content, variables)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING *",
                )
                .bind(id)
                .bind(code)
                .bind(template_type)
                .bind(language)
                .bind(version)
                .bind(sqlx::types::Json(content))
                .bind(sqlx::types::Json(variables))
                .fetch_one(pool)
                .await
                .map_err(Error::from)
            }
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                let row = Template {
                    id: Uuid::new_v4(),
                    code: code.to_string(),
                    template_type: template_type.to_string(),
                    language: language.to_string(),
                    version,
                    content: sqlx::types::Json(content.clone()),
                    variables: sqlx::types::Json(variables.to_vec()),
                    created_at: Utc::now(),
                };
                templates.lock().push(row.clone());
                Ok(row)
            }
        }
    }

    /// Page of the latest version per `(code, language)` family, ordered
    /// by code then language (§6 "GET /templates?page=&limit=").
    pub async fn list_latest(&self, limit: i64, offset: i64) -> Result<Vec<Template>> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => sqlx::query_as::<_, Template>(
                "SELECT DISTINCT ON (code, language) * FROM templates
                 ORDER BY code, language, version DESC
                 OFFSET $1 LIMIT $2",
            )
            .bind(offset)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(Error::from),
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                let all = templates.lock();
                let mut latest: HashMap<(String, String), Template> = HashMap::new();
                for t in all.iter() {
                    let key = (t.code.clone(), t.language.clone());
                    latest
                        .entry(key)
                        .and_modify(|existing| {
                            if t.version > existing.version {
                                *existing = t.clone();
                            }
                        })
                        .or_insert_with(|| t.clone());
                }
                let mut rows: Vec<Template> = latest.into_values().collect();
                rows.sort_by(|a, b| (a.code.as_str(), a.language.as_str()).cmp(&(b.code.as_str(), b.language.as_str())));
                Ok(rows
                    .into_iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .collect())
            }
        }
    }

    pub async fn delete_all(&self, code: &str, language: &str) -> Result<()> {
        match &self.backend {
            TemplateBackend::Postgres(pool) => {
                sqlx::query("DELETE FROM templates WHERE code = $1 AND language = $2")
                    .bind(code)
                    .bind(language)
                    .execute(pool)
                    .await?;
                Ok(())
            }
            TemplateBackend::Memory(templates, failing) => {
                if failing.load(Ordering::SeqCst) {
                    return Err(Error::Unavailable("template store unreachable".into()));
                }
                templates
                    .lock()
                    .retain(|t| !(t.code == code && t.language == language));
                Ok(())
            }
        }
    }
}

/// Audit log status (spec §3 "Audit log row").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Queued,
    Processing,
    Sent,
    Failed,
    Dlq,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Queued => "queued",
            AuditStatus::Processing => "processing",
            AuditStatus::Sent => "sent",
            AuditStatus::Failed => "failed",
            AuditStatus::Dlq => "dlq",
        }
    }
}

/// One append-only audit row. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub trace_id: String,
    pub user_id: String,
    pub notification_type: String,
    pub template_code: String,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub metadata: Value,
}

#[derive(Clone)]
enum AuditBackend {
    Postgres(PgPool),
    Memory(Arc<Mutex<Vec<AuditRow>>>),
}

/// Repository for the append-only `audit_logs` table. Backed by an
/// in-process `Vec` via [`AuditRepository::in_memory`] for the `tests/`
/// integration suite.
#[derive(Clone)]
pub struct AuditRepository {
    backend: AuditBackend,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: AuditBackend::Postgres(pool),
        }
    }

    pub fn in_memory() -> (Self, Arc<Mutex<Vec<AuditRow>>>) {
        let rows = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                backend: AuditBackend::Memory(rows.clone()),
            },
            rows,
        )
    }

    pub async fn append(&self, row: &AuditRow) -> Result<()> {
        match &self.backend {
            AuditBackend::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO audit_logs
                        (id, trace_id, user_id, notification_type, template_code, status, error_message, metadata)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(Uuid::new_v4())
                .bind(&row.trace_id)
                .bind(&row.user_id)
                .bind(&row.notification_type)
                .bind(&row.template_code)
                .bind(row.status.as_str())
                .bind(&row.error_message)
                .bind(&row.metadata)
                .execute(pool)
                .await?;
                Ok(())
            }
            AuditBackend::Memory(rows) => {
                rows.lock().push(row.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_default_both_enabled() {
        let prefs = Preferences::default();
        assert!(prefs.email);
        assert!(prefs.push);
    }

    #[test]
    fn audit_status_strings_match_spec_enum() {
        assert_eq!(AuditStatus::Queued.as_str(), "queued");
        assert_eq!(AuditStatus::Dlq.as_str(), "dlq");
    }
}
