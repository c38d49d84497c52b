//! Gateway binary: auth (C5), notification dispatch (C6), and health (C8)
//! over HTTP.

use std::sync::Arc;

use notifyd::api::{gateway_router, GatewayState};
use notifyd::breaker::{BreakerConfig, CircuitBreaker};
use notifyd::broker::BrokerClient;
use notifyd::cache::CacheClient;
use notifyd::config::Config;
use notifyd::database::{ConnectionPool, DatabaseConfig};
use notifyd::enterprise::audit::AuditWriter;
use notifyd::enterprise::auth::{AuthCore, JwtConfig, JwtManager};
use notifyd::health::HealthAggregator;
use notifyd::store::{AuditRepository, UserRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd::tracing_init::init();

    let config = Arc::new(Config::from_env());

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
    let breaker = CircuitBreaker::new(cache.clone(), breaker_config, "gateway");

    let users = UserRepository::new(pool.inner().clone());
    let audit = AuditWriter::spawn(AuditRepository::new(pool.inner().clone()));

    let jwt = JwtManager::new(JwtConfig {
        secret: config.jwt_secret.clone(),
        access_ttl: config.jwt_access_ttl,
        refresh_ttl: config.jwt_refresh_ttl,
    });
    let auth = AuthCore::new(jwt, cache.clone(), users.clone());

    let health = Arc::new(HealthAggregator::new(
        pool,
        cache.clone(),
        broker.clone(),
        breaker.clone(),
        vec!["db", "smtp", "fcm"],
    ));

    let state = Arc::new(GatewayState {
        auth,
        cache,
        breaker,
        broker,
        users,
        audit,
        health,
        config: config.clone(),
    });

    let app = gateway_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
