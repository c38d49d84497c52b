//! Schema migration runner for the three durable tables named in spec §6.
//!
//! Generalized from the donor's version-tracked `MigrationManager` (a
//! `_migrations` bookkeeping table plus ordered up/down SQL) onto Postgres
//! and this system's three tables; the donor's CAD-entity migrations were
//! dropped.

use sqlx::PgPool;

use super::{DatabaseError, Result};

/// One forward migration step. Down-migrations are intentionally not
/// modeled — this system only ever grows its schema at startup.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Runs every migration not yet recorded in `_migrations`, in version order,
/// each inside its own transaction.
pub struct MigrationManager {
    pool: PgPool,
}

impl MigrationManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_pending(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        for migration in MIGRATIONS {
            let applied: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM _migrations WHERE version = $1")
                    .bind(migration.version)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            if applied.is_some() {
                continue;
            }

            tracing::info!(version = migration.version, name = migration.name, "running migration");
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            sqlx::query(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::Migration(format!("{}: {e}", migration.name)))?;

            sqlx::query("INSERT INTO _migrations (version, name) VALUES ($1, $2)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        }

        Ok(())
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 20260101_0001,
        name: "create_users_table",
        sql: r#"
            CREATE TABLE users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                push_token TEXT,
                preferences JSONB NOT NULL DEFAULT '{"email": true, "push": true}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
        "#,
    },
    Migration {
        version: 20260101_0002,
        name: "create_templates_table",
        sql: r#"
            CREATE TABLE templates (
                id UUID PRIMARY KEY,
                code TEXT NOT NULL,
                template_type TEXT NOT NULL,
                language TEXT NOT NULL,
                version INTEGER NOT NULL,
                content JSONB NOT NULL,
                variables JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (code, language, version)
            );
            CREATE INDEX idx_templates_code_lang_version ON templates (code, language, version);
        "#,
    },
    Migration {
        version: 20260101_0003,
        name: "create_audit_logs_table",
        sql: r#"
            CREATE TABLE audit_logs (
                id UUID PRIMARY KEY,
                trace_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                template_code TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX idx_audit_logs_trace_id ON audit_logs (trace_id);
            CREATE INDEX idx_audit_logs_user_id ON audit_logs (user_id);
            CREATE INDEX idx_audit_logs_status ON audit_logs (status);
            CREATE INDEX idx_audit_logs_created_at ON audit_logs (created_at DESC);
        "#,
    },
];
