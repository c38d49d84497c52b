//! Health aggregator (C8, spec §4.8): probes each collaborator with a raw
//! call that records success/failure but never consults `allow` — a health
//! check must not be short-circuited by the breaker it is reporting on.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::breaker::{BreakerStatus, CircuitBreaker};
use crate::broker::BrokerClient;
use crate::cache::CacheClient;
use crate::database::ConnectionPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub status: Status,
    pub latency_ms: Option<u64>,
    pub breaker: Option<BreakerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub dependencies: std::collections::HashMap<String, DependencyHealth>,
}

impl HealthReport {
    /// `200` for healthy/degraded, `503` for down.
    pub fn http_status(&self) -> axum::http::StatusCode {
        match self.status {
            Status::Down => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            _ => axum::http::StatusCode::OK,
        }
    }
}

fn rollup(statuses: impl Iterator<Item = Status>) -> Status {
    let mut worst = Status::Healthy;
    for status in statuses {
        match status {
            Status::Down => return Status::Down,
            Status::Degraded => worst = Status::Degraded,
            Status::Healthy => {}
        }
    }
    worst
}

/// Composite probe over the durable store, cache, and broker, plus each
/// named resource's breaker state.
pub struct HealthAggregator {
    pool: ConnectionPool,
    cache: CacheClient,
    broker: BrokerClient,
    breaker: CircuitBreaker,
    breaker_resources: Vec<&'static str>,
}

impl HealthAggregator {
    pub fn new(
        pool: ConnectionPool,
        cache: CacheClient,
        broker: BrokerClient,
        breaker: CircuitBreaker,
        breaker_resources: Vec<&'static str>,
    ) -> Self {
        Self {
            pool,
            cache,
            broker,
            breaker,
            breaker_resources,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let mut dependencies = std::collections::HashMap::new();

        dependencies.insert("database".to_string(), self.check_database().await);
        dependencies.insert("cache".to_string(), self.check_cache().await);
        dependencies.insert("broker".to_string(), self.check_broker());

        for resource in &self.breaker_resources {
            let health = self.check_breaker_resource(resource).await;
            dependencies.insert((*resource).to_string(), health);
        }

        let status = rollup(dependencies.values().map(|d| d.status));
        HealthReport { status, dependencies }
    }

    async fn check_database(&self) -> DependencyHealth {
        let start = Instant::now();
        match self.pool.health_check().await {
            Ok((true, _)) => DependencyHealth {
                status: Status::Healthy,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                breaker: None,
            },
            _ => DependencyHealth {
                status: Status::Down,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                breaker: None,
            },
        }
    }

    /// Write/read/compare round-trip, bypassing the breaker entirely.
    async fn check_cache(&self) -> DependencyHealth {
        let start = Instant::now();
        let key = "health:probe";
        let value = b"ok";
        let write = self.cache.set(key, value, Some(Duration::from_secs(5))).await;
        let read = self.cache.get(key).await;

        let status = match (write, read) {
            (Ok(()), Ok(Some(bytes))) if bytes == value => Status::Healthy,
            _ => Status::Down,
        };

        DependencyHealth {
            status,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            breaker: None,
        }
    }

    fn check_broker(&self) -> DependencyHealth {
        DependencyHealth {
            status: if self.broker.is_connected() {
                Status::Healthy
            } else {
                Status::Down
            },
            latency_ms: None,
            breaker: None,
        }
    }

    async fn check_breaker_resource(&self, resource: &str) -> DependencyHealth {
        match self.breaker.status(resource).await {
            Ok(status) => {
                let health_status = match status.state {
                    crate::breaker::CircuitState::Closed => Status::Healthy,
                    crate::breaker::CircuitState::HalfOpen => Status::Degraded,
                    crate::breaker::CircuitState::Open => Status::Down,
                };
                DependencyHealth {
                    status: health_status,
                    latency_ms: None,
                    breaker: Some(status),
                }
            }
            Err(_) => DependencyHealth {
                status: Status::Degraded,
                latency_ms: None,
                breaker: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_prefers_down_over_degraded_over_healthy() {
        assert_eq!(
            rollup([Status::Healthy, Status::Degraded, Status::Down].into_iter()),
            Status::Down
        );
        assert_eq!(
            rollup([Status::Healthy, Status::Degraded].into_iter()),
            Status::Degraded
        );
        assert_eq!(rollup([Status::Healthy].into_iter()), Status::Healthy);
    }
}
