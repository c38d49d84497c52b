//! Worker binary (C7): one process services one queue, selected by
//! `--queue <email|push>` or the `WORKER_QUEUE` environment variable.

use std::sync::Arc;
use std::time::Duration;

use notifyd::breaker::{BreakerConfig, CircuitBreaker};
use notifyd::broker::{BrokerClient, EMAIL_QUEUE, PUSH_QUEUE};
use notifyd::cache::CacheClient;
use notifyd::config::Config;
use notifyd::database::{ConnectionPool, DatabaseConfig};
use notifyd::enterprise::audit::AuditWriter;
use notifyd::store::AuditRepository;
use notifyd::templates::TemplateResolver;
use notifyd::transport::{FcmPushTransport, SmtpEmailTransport};
use notifyd::worker::{Dispatch, WorkerRuntime};

const PREFETCH: u16 = 10;

fn selected_queue() -> anyhow::Result<&'static str> {
    let from_arg = std::env::args().collect::<Vec<_>>().windows(2).find_map(|pair| {
        (pair[0] == "--queue").then(|| pair[1].clone())
    });
    let selection = from_arg
        .or_else(|| std::env::var("WORKER_QUEUE").ok())
        .ok_or_else(|| anyhow::anyhow!("pass --queue <email|push> or set WORKER_QUEUE"))?;

    match selection.as_str() {
        "email" => Ok(EMAIL_QUEUE),
        "push" => Ok(PUSH_QUEUE),
        other => Err(anyhow::anyhow!("unknown queue selection {other}, expected email or push")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd::tracing_init::init();

    let queue = selected_queue()?;
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
    let breaker = CircuitBreaker::new(cache.clone(), breaker_config, "worker");

    let templates_repo = notifyd::store::TemplateRepository::new(pool.inner().clone());
    let resolver = TemplateResolver::new(cache.clone(), breaker.clone(), templates_repo);
    let audit = AuditWriter::spawn(AuditRepository::new(pool.inner().clone()));

    let dispatch = if queue == EMAIL_QUEUE {
        let transport = SmtpEmailTransport::new(
            &config.smtp_host,
            config.smtp_port,
            config.smtp_user.as_deref(),
            config.smtp_password.as_deref(),
            &config.smtp_from,
            Duration::from_secs(30),
        )?;
        Dispatch::Email {
            transport: Arc::new(transport),
        }
    } else {
        let transport = FcmPushTransport::new(config.fcm_server_key.clone(), Duration::from_secs(30));
        Dispatch::Push {
            transport: Arc::new(transport),
        }
    };

    let runtime = WorkerRuntime::new(queue, cache, breaker, resolver, broker, audit, dispatch);
    tracing::info!(queue, "worker starting");
    runtime.run(PREFETCH).await?;

    Ok(())
}
