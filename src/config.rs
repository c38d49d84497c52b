//! Environment-driven configuration surface (§6 "Config surface").
//!
//! Each binary loads one `Config` at startup via [`Config::from_env`] and
//! fails fast on a missing required variable, matching the donor's
//! `EnterpriseConfig::from_file` convention of a single typed struct per
//! process rather than scattered `env::var` calls.

use std::time::Duration;

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_access_ttl: Duration,
    pub jwt_refresh_ttl: Duration,
    pub database_url: String,
    pub redis_url: String,
    pub rabbitmq_url: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub fcm_server_key: String,
    pub template_service_url: String,
    pub user_service_url: String,
    pub rate_limit_ttl: Duration,
    pub rate_limit_max: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_timeout: Duration,
}

impl Config {
    /// Loads configuration from the process environment. Panics (at boot,
    /// before any request is served) if `JWT_SECRET` or `DATABASE_URL` is
    /// missing — every other option has a development-friendly default.
    pub fn from_env() -> Self {
        let jwt_secret = env_var("JWT_SECRET")
            .expect("JWT_SECRET must be set");
        let database_url = env_var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        Config {
            port: env_parse("PORT", 8080),
            jwt_secret,
            jwt_access_ttl: Duration::from_secs(env_parse("JWT_EXPIRATION", 900)),
            jwt_refresh_ttl: Duration::from_secs(env_parse("JWT_REFRESH_EXPIRATION", 604_800)),
            database_url,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            rabbitmq_url: env_or("RABBITMQ_URL", "amqp://127.0.0.1:5672/%2f"),
            smtp_host: env_or("SMTP_HOST", "localhost"),
            smtp_port: env_parse("SMTP_PORT", 587),
            smtp_user: env_var("SMTP_USER"),
            smtp_password: env_var("SMTP_PASSWORD"),
            smtp_from: env_or("SMTP_FROM", "noreply@notifyd.local"),
            fcm_server_key: env_or("FCM_SERVER_KEY", ""),
            template_service_url: env_or("TEMPLATE_SERVICE_URL", "http://127.0.0.1:8081"),
            user_service_url: env_or("USER_SERVICE_URL", "http://127.0.0.1:8080"),
            rate_limit_ttl: Duration::from_secs(env_parse("RATE_LIMIT_TTL", 60)),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 100),
            breaker_failure_threshold: env_parse("CIRCUIT_BREAKER_THRESHOLD", 5),
            breaker_success_threshold: env_parse("CIRCUIT_BREAKER_SUCCESS_THRESHOLD", 2),
            breaker_timeout: Duration::from_secs(env_parse("CIRCUIT_BREAKER_TIMEOUT", 60)),
        }
    }
}
