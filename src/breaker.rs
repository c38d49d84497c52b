//! Shared circuit breaker (C2) — per-resource CLOSED/OPEN/HALF_OPEN state
//! machine with state persisted in C1 so every replica agrees.
//!
//! Grounded on `api/gateway.rs`'s in-process `CircuitBreaker` (state names,
//! transition shape, default thresholds) generalized to keep its state in
//! Redis instead of `Arc<RwLock<_>>`, per spec §4.2.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::CacheClient;
use crate::error::Result;

/// Breaker state as observed by `status`/`allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning knobs, sourced from `CIRCUIT_BREAKER_*` config (§6).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Snapshot returned by `status(resource)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
    pub next_attempt: Option<u64>,
}

/// Breaker key triple lifetime: 60-120s slack past the configured timeout
/// so stale state self-heals even if nothing ever calls `recordSuccess`.
fn key_lifetime(timeout: Duration) -> Duration {
    timeout + Duration::from_secs(60)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A circuit breaker instance bound to one cache client and config. Stateless
/// beyond that — every call re-reads/writes Redis, which is what lets all
/// replicas observe the same breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    cache: CacheClient,
    config: BreakerConfig,
    /// Logical namespace the breaker state lives under, e.g. `"circuit"`.
    scope: String,
}

impl CircuitBreaker {
    pub fn new(cache: CacheClient, config: BreakerConfig, scope: impl Into<String>) -> Self {
        Self {
            cache,
            config,
            scope: scope.into(),
        }
    }

    fn state_key(&self, resource: &str) -> String {
        format!("circuit:{}:{}:state", self.scope, resource)
    }

    fn failures_key(&self, resource: &str) -> String {
        format!("circuit:{}:{}:failures", self.scope, resource)
    }

    fn open_time_key(&self, resource: &str) -> String {
        format!("circuit:{}:{}:open_time", self.scope, resource)
    }

    fn successes_key(&self, resource: &str) -> String {
        format!("circuit:{}:{}:successes", self.scope, resource)
    }

    async fn read_state(&self, resource: &str) -> Result<CircuitState> {
        match self.cache.get(&self.state_key(resource)).await? {
            Some(bytes) if bytes == b"open" => Ok(CircuitState::Open),
            Some(bytes) if bytes == b"half_open" => Ok(CircuitState::HalfOpen),
            _ => Ok(CircuitState::Closed),
        }
    }

    async fn write_state(&self, resource: &str, state: CircuitState) -> Result<()> {
        let value: &[u8] = match state {
            CircuitState::Closed => b"closed",
            CircuitState::Open => b"open",
            CircuitState::HalfOpen => b"half_open",
        };
        self.cache
            .set(&self.state_key(resource), value, Some(key_lifetime(self.config.timeout)))
            .await
    }

    async fn read_u32(&self, key: &str) -> Result<u32> {
        Ok(self
            .cache
            .get(key)
            .await?
            .and_then(|b| std::str::from_utf8(&b).ok().and_then(|s| s.parse().ok()))
            .unwrap_or(0))
    }

    /// `allow(resource) -> bool`. Lazily transitions OPEN -> HALF_OPEN once
    /// `timeout` has elapsed since `open_time`. Returning `false` is not an
    /// error — callers substitute a fallback.
    pub async fn allow(&self, resource: &str) -> Result<bool> {
        match self.read_state(resource).await? {
            CircuitState::Closed => Ok(true),
            CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let open_time = self.read_u32(&self.open_time_key(resource)).await? as u64;
                if open_time != 0 && now_unix().saturating_sub(open_time) >= self.config.timeout.as_secs() {
                    self.write_state(resource, CircuitState::HalfOpen).await?;
                    self.cache
                        .set(&self.successes_key(resource), b"0", Some(key_lifetime(self.config.timeout)))
                        .await?;
                    tracing::info!(resource, "breaker: OPEN -> HALF_OPEN (timeout elapsed)");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// `recordSuccess(resource)`. In CLOSED: clears the failure counter. In
    /// HALF_OPEN: increments the success counter, closing the circuit once
    /// `successThreshold` is reached. Undefined (no-op) while OPEN — the
    /// caller should have already been short-circuited by `allow`.
    pub async fn record_success(&self, resource: &str) -> Result<()> {
        match self.read_state(resource).await? {
            CircuitState::Closed => {
                self.cache.delete(&self.failures_key(resource)).await?;
            }
            CircuitState::HalfOpen => {
                let successes = self.cache.incr(&self.successes_key(resource)).await?;
                if successes as u32 >= self.config.success_threshold {
                    self.write_state(resource, CircuitState::Closed).await?;
                    self.cache.delete(&self.failures_key(resource)).await?;
                    self.cache.delete(&self.successes_key(resource)).await?;
                    tracing::info!(resource, "breaker: HALF_OPEN -> CLOSED");
                }
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    /// `recordFailure(resource)`. While OPEN, failures are noise-suppressed
    /// (the counter does not increment). In HALF_OPEN, any failure reopens
    /// immediately.
    pub async fn record_failure(&self, resource: &str) -> Result<()> {
        match self.read_state(resource).await? {
            CircuitState::Closed => {
                let failures = self.cache.incr(&self.failures_key(resource)).await?;
                if failures as u32 >= self.config.failure_threshold {
                    self.trip_open(resource).await?;
                }
            }
            CircuitState::HalfOpen => {
                self.trip_open(resource).await?;
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    async fn trip_open(&self, resource: &str) -> Result<()> {
        self.write_state(resource, CircuitState::Open).await?;
        self.cache
            .set(
                &self.open_time_key(resource),
                now_unix().to_string().as_bytes(),
                Some(key_lifetime(self.config.timeout)),
            )
            .await?;
        tracing::warn!(resource, "breaker: tripped OPEN");
        Ok(())
    }

    /// `status(resource) -> {state, failures, nextAttempt}`.
    pub async fn status(&self, resource: &str) -> Result<BreakerStatus> {
        let state = self.read_state(resource).await?;
        let failures = self.read_u32(&self.failures_key(resource)).await?;
        let next_attempt = if state == CircuitState::Open {
            let open_time = self.read_u32(&self.open_time_key(resource)).await? as u64;
            Some(open_time + self.config.timeout.as_secs())
        } else {
            None
        };
        Ok(BreakerStatus {
            state,
            failures,
            next_attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    //! Full state-machine transitions need a live cache connection to
    //! exercise `allow`/`record_success`/`record_failure` end to end; what's
    //! testable here without one is the pure configuration surface.
    use super::*;

    #[test]
    fn default_thresholds_match_spec() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }
}
