//! Template-service binary: HTTP surface over C3 (resolver) and C4
//! (catalog writer).

use std::sync::Arc;

use notifyd::api::{template_router, TemplateServiceState};
use notifyd::breaker::{BreakerConfig, CircuitBreaker};
use notifyd::broker::BrokerClient;
use notifyd::cache::CacheClient;
use notifyd::config::Config;
use notifyd::database::{ConnectionPool, DatabaseConfig};
use notifyd::store::TemplateRepository;
use notifyd::templates::{TemplateCatalog, TemplateResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd::tracing_init::init();

    let config = Config::from_env();

    let pool = ConnectionPool::new(DatabaseConfig {
        url: config.database_url.clone(),
        ..Default::default()
    })
    .await?;
    let cache = CacheClient::connect(&config.redis_url).await?;
    let broker = BrokerClient::connect(&config.rabbitmq_url).await?;

    let breaker_config = BreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        success_threshold: config.breaker_success_threshold,
        timeout: config.breaker_timeout,
    };
    let breaker = CircuitBreaker::new(cache.clone(), breaker_config, "template-service");

    let repo = TemplateRepository::new(pool.inner().clone());
    let resolver = TemplateResolver::new(cache.clone(), breaker, repo.clone());
    let catalog = TemplateCatalog::new(cache, broker, repo);

    let state = Arc::new(TemplateServiceState { catalog, resolver });

    let app = template_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "template service listening");
    axum::serve(listener, app).await?;

    Ok(())
}
