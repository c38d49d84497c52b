//! Runs pending schema migrations against `DATABASE_URL` and exits.

use sqlx::postgres::PgPoolOptions;

use notifyd::config::Config;
use notifyd::database::MigrationManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd::tracing_init::init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    MigrationManager::new(pool)
        .run_pending()
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;

    tracing::info!("migrations complete");
    Ok(())
}
