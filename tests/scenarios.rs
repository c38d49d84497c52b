//! End-to-end scenario tests (S1-S6) against in-process fakes: no real
//! Postgres, Redis, or RabbitMQ. Exercises the gateway handlers and the
//! worker's per-message algorithm directly, the way the teacher's own
//! `tests/` directory drives its HTTP handlers and background workers
//! without a bound socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use axum::Json;
use parking_lot::Mutex;
use uuid::Uuid;

use notifyd::api::handlers::{
    self, LoginRequest, RefreshRequest, SendNotificationRequest, ValidateRequest, ValidateResponse,
};
use notifyd::api::state::GatewayState;
use notifyd::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use notifyd::broker::{BrokerClient, NotificationEnvelope, PublishedMessages, EMAIL_QUEUE};
use notifyd::cache::CacheClient;
use notifyd::config::Config;
use notifyd::database::{ConnectionPool, DatabaseConfig};
use notifyd::enterprise::audit::AuditWriter;
use notifyd::enterprise::auth::user::hash_password;
use notifyd::enterprise::auth::{AuthCore, JwtConfig, JwtManager};
use notifyd::error::Error;
use notifyd::health::HealthAggregator;
use notifyd::store::{AuditRepository, AuditRow, AuditStatus, Preferences, Template, TemplateRepository, User, UserRepository};
use notifyd::templates::TemplateResolver;
use notifyd::transport::{DeliveryOutcome, EmailMessage, EmailTransport};
use notifyd::worker::{Dispatch, WorkerRuntime};

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        port: 8080,
        jwt_secret: "scenario-test-secret".to_string(),
        jwt_access_ttl: Duration::from_secs(900),
        jwt_refresh_ttl: Duration::from_secs(604_800),
        database_url: "postgres://test/test".to_string(),
        redis_url: "redis://test".to_string(),
        rabbitmq_url: "amqp://test".to_string(),
        smtp_host: "localhost".to_string(),
        smtp_port: 587,
        smtp_user: None,
        smtp_password: None,
        smtp_from: "noreply@notifyd.test".to_string(),
        fcm_server_key: String::new(),
        template_service_url: "http://127.0.0.1:8081".to_string(),
        user_service_url: "http://127.0.0.1:8080".to_string(),
        rate_limit_ttl: Duration::from_secs(60),
        rate_limit_max: 100,
        breaker_failure_threshold: 5,
        breaker_success_threshold: 2,
        breaker_timeout: Duration::from_secs(60),
    })
}

fn test_user(email: &str, password: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: hash_password(password).unwrap(),
        push_token: Some("push-token-1".to_string()),
        preferences: sqlx::types::Json(Preferences::default()),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

/// Builds a `GatewayState` over in-memory cache/broker/store backends plus
/// a lazily-connected pool (never queried by anything these tests call).
async fn gateway_fixture(user: User) -> (Arc<GatewayState>, PublishedMessages, Arc<Mutex<Vec<AuditRow>>>) {
    let cache = CacheClient::in_memory();
    let (broker, messages) = BrokerClient::in_memory();
    let users = UserRepository::in_memory(vec![user]);
    let (audit_repo, audit_rows) = AuditRepository::in_memory();
    let audit = AuditWriter::spawn(audit_repo);
    let breaker = CircuitBreaker::new(cache.clone(), BreakerConfig::default(), "gateway");

    let jwt = JwtManager::new(JwtConfig {
        secret: "scenario-test-secret".to_string(),
        access_ttl: Duration::from_secs(900),
        refresh_ttl: Duration::from_secs(604_800),
    });
    let auth = AuthCore::new(jwt, cache.clone(), users.clone());

    let pool = ConnectionPool::connect_lazy(DatabaseConfig {
        health_check_interval: 3600,
        ..Default::default()
    })
    .expect("lazy pool construction never touches the network");

    let health = Arc::new(HealthAggregator::new(
        pool,
        cache.clone(),
        broker.clone(),
        breaker.clone(),
        vec!["smtp", "fcm", "db"],
    ));

    let state = Arc::new(GatewayState {
        auth,
        cache,
        breaker,
        broker,
        users,
        audit,
        health,
        config: test_config(),
    });

    (state, messages, audit_rows)
}

fn sample_template(code: &str, language: &str, version: i32) -> Template {
    let mut content: HashMap<String, String> = HashMap::new();
    content.insert("subject".to_string(), "Welcome".to_string());
    content.insert("body".to_string(), "Hello {{name}}".to_string());
    Template {
        id: Uuid::new_v4(),
        code: code.to_string(),
        template_type: "transactional".to_string(),
        language: language.to_string(),
        version,
        content: sqlx::types::Json(content),
        variables: sqlx::types::Json(vec!["name".to_string()]),
        created_at: chrono::Utc::now(),
    }
}

fn sample_envelope(notification_id: &str, user: &User, attempt: u32) -> NotificationEnvelope {
    NotificationEnvelope {
        notification_id: notification_id.to_string(),
        idempotency_key: format!("idem-{notification_id}"),
        user_id: user.id.to_string(),
        push_token: user.push_token.clone(),
        recipient_email: Some(user.email.clone()),
        template_code: "welcome".to_string(),
        language: "en".to_string(),
        variables: serde_json::Map::new(),
        created_by: user.id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        metadata: None,
        attempt,
    }
}

struct FakeTransport {
    calls: Arc<AtomicUsize>,
    outcome: DeliveryOutcome,
}

#[async_trait]
impl EmailTransport for FakeTransport {
    async fn send(&self, _message: &EmailMessage) -> DeliveryOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }
}

fn idempotency_header() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-idempotency-key", "K1".parse().unwrap());
    headers
}

/// S1: login, then send a notification; the gateway publishes exactly one
/// envelope on `email.queue` with the caller-supplied `request_id`.
#[tokio::test]
async fn s1_login_and_send_publishes_one_envelope() {
    let user = test_user("s1@example.com", "correct horse battery staple");
    let (state, messages, _audit) = gateway_fixture(user.clone()).await;

    let login_reply = handlers::login(
        State(state.clone()),
        Json(LoginRequest {
            email: "s1@example.com".to_string(),
            password: "correct horse battery staple".to_string(),
        }),
    )
    .await
    .expect("login should succeed");
    assert_eq!(login_reply.status, axum::http::StatusCode::OK);
    assert_eq!(login_reply.body.data.user.id, user.id);

    let claims = state
        .auth
        .validate(&login_reply.body.data.access_token)
        .await
        .expect("freshly issued access token validates");
    assert_eq!(claims.sub, user.id.to_string());

    let send_reply = handlers::send_notification(
        State(state.clone()),
        Extension(claims),
        idempotency_header(),
        Json(SendNotificationRequest {
            notification_type: "email".to_string(),
            template_code: "welcome".to_string(),
            variables: serde_json::Map::new(),
            request_id: "r1".to_string(),
            priority: 0,
            metadata: None,
        }),
    )
    .await
    .expect("send should succeed");

    assert_eq!(send_reply.status, axum::http::StatusCode::OK);
    assert_eq!(send_reply.body.data.notification_id, "r1");
    assert_eq!(send_reply.body.data.status, "queued");
    assert_eq!(send_reply.body.data.queues, vec![EMAIL_QUEUE]);

    assert_eq!(messages.count(EMAIL_QUEUE), 1);
    let published = messages.get(EMAIL_QUEUE);
    let envelope: NotificationEnvelope = serde_json::from_slice(&published[0]).unwrap();
    assert_eq!(envelope.notification_id, "r1");
}

/// S2: replaying the same idempotency key returns 409 and publishes nothing
/// new.
#[tokio::test]
async fn s2_duplicate_idempotency_key_is_rejected() {
    let user = test_user("s2@example.com", "correct horse battery staple");
    let (state, messages, _audit) = gateway_fixture(user.clone()).await;

    let (_, pair) = state
        .auth
        .login("s2@example.com", "correct horse battery staple")
        .await
        .unwrap();
    let claims = state.auth.validate(&pair.access_token).await.unwrap();

    let request = || SendNotificationRequest {
        notification_type: "email".to_string(),
        template_code: "welcome".to_string(),
        variables: serde_json::Map::new(),
        request_id: "r1".to_string(),
        priority: 0,
        metadata: None,
    };

    handlers::send_notification(
        State(state.clone()),
        Extension(claims.clone()),
        idempotency_header(),
        Json(request()),
    )
    .await
    .expect("first send succeeds");
    assert_eq!(messages.count(EMAIL_QUEUE), 1);

    let second = handlers::send_notification(
        State(state.clone()),
        Extension(claims),
        idempotency_header(),
        Json(request()),
    )
    .await;

    assert!(matches!(second, Err(Error::Conflict(_))));
    assert_eq!(messages.count(EMAIL_QUEUE), 1, "no new envelope on a duplicate key");
}

/// S3: the same envelope handled twice (a redelivered duplicate) results in
/// exactly one transport call and exactly one `Sent` audit row.
#[tokio::test]
async fn s3_duplicate_delivery_sends_exactly_once() {
    let cache = CacheClient::in_memory();
    let (broker, _messages) = BrokerClient::in_memory();
    let breaker = CircuitBreaker::new(cache.clone(), BreakerConfig::default(), "worker");
    let templates = TemplateRepository::in_memory(vec![sample_template("welcome", "en", 1)]);
    let resolver = TemplateResolver::new(cache.clone(), breaker.clone(), templates);
    let (audit_repo, audit_rows) = AuditRepository::in_memory();
    let audit = AuditWriter::spawn(audit_repo);

    let calls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(FakeTransport {
        calls: calls.clone(),
        outcome: DeliveryOutcome::Sent,
    });

    let runtime = WorkerRuntime::new(
        EMAIL_QUEUE,
        cache.clone(),
        breaker,
        resolver,
        broker,
        audit,
        Dispatch::Email { transport },
    );

    let user = test_user("s3@example.com", "correct horse battery staple");
    let envelope = sample_envelope("r1", &user, 0);

    runtime.handle(&envelope).await.expect("first delivery succeeds");
    runtime.handle(&envelope).await.expect("duplicate is a no-op");

    assert_eq!(calls.load(Ordering::SeqCst), 1, "transport called exactly once");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let rows = audit_rows.lock();
    let sent: Vec<_> = rows.iter().filter(|r| r.status == AuditStatus::Sent).collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trace_id, "r1");
}

/// S4: a transport that always fails retryably exhausts the retry budget
/// and escalates to the dead-letter queue on the fourth handling.
#[tokio::test]
async fn s4_exhausted_retries_escalate_to_dlq() {
    let cache = CacheClient::in_memory();
    let (broker, messages) = BrokerClient::in_memory();
    let breaker = CircuitBreaker::new(cache.clone(), BreakerConfig::default(), "worker");
    let templates = TemplateRepository::in_memory(vec![sample_template("welcome", "en", 1)]);
    let resolver = TemplateResolver::new(cache.clone(), breaker.clone(), templates);
    let (audit_repo, audit_rows) = AuditRepository::in_memory();
    let audit = AuditWriter::spawn(audit_repo);

    let calls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(FakeTransport {
        calls: calls.clone(),
        outcome: DeliveryOutcome::RetryableFailure,
    });

    let runtime = WorkerRuntime::new(
        EMAIL_QUEUE,
        cache.clone(),
        breaker,
        resolver,
        broker,
        audit,
        Dispatch::Email { transport },
    );

    let user = test_user("s4@example.com", "correct horse battery staple");
    let mut envelope = sample_envelope("r1", &user, 0);

    for _ in 0..4 {
        runtime.handle(&envelope).await.expect("handle always acks");
        if let Some(last) = messages.get(EMAIL_QUEUE).last() {
            envelope = serde_json::from_slice(last).unwrap();
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 4, "one delivery attempt per handling");
    assert_eq!(messages.count("failed"), 1, "exactly one envelope reaches the DLQ");

    let marker = cache.get("idempotency:r1").await.unwrap();
    assert_eq!(marker, Some(b"failed".to_vec()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let rows = audit_rows.lock();
    let failed: Vec<_> = rows.iter().filter(|r| r.status == AuditStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].trace_id, "r1");
}

/// S5: once the template store has failed enough to trip the breaker, the
/// resolver serves the newest cached version instead of propagating the
/// error, and still reports `Unavailable` for a code with nothing cached.
#[tokio::test]
async fn s5_breaker_trips_and_serves_stale_template() {
    let cache = CacheClient::in_memory();
    let breaker = CircuitBreaker::new(cache.clone(), BreakerConfig::default(), "template");
    let (templates, failing) =
        TemplateRepository::in_memory_with_fault(vec![sample_template("welcome", "en", 1)]);
    let resolver = TemplateResolver::new(cache.clone(), breaker.clone(), templates);

    let warm = resolver.resolve("welcome", "en", None).await.expect("initial fetch succeeds");
    assert_eq!(warm.version, 1);

    // Evict only the "latest" cache entry so the next lookup must consult
    // the (now failing) store rather than short-circuiting on a cache hit.
    cache.delete("template:welcome:en:latest").await.unwrap();

    failing.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        let _ = resolver.resolve("welcome", "en", None).await;
    }

    let status = breaker.status("db").await.unwrap();
    assert_eq!(status.state, CircuitState::Open, "five consecutive db failures trip the breaker");

    let stale = resolver
        .resolve("welcome", "en", None)
        .await
        .expect("breaker OPEN falls back to the cached version");
    assert_eq!(stale.version, 1);

    let uncached = resolver.resolve("other-code", "en", None).await;
    assert!(matches!(uncached, Err(Error::Unavailable(_))));
}

/// S6: refresh rotates the token pair and invalidates the old refresh
/// token; logout then invalidates the new refresh token too.
#[tokio::test]
async fn s6_refresh_rotation_and_logout_revoke_tokens() {
    let user = test_user("s6@example.com", "correct horse battery staple");
    let (state, _messages, _audit) = gateway_fixture(user.clone()).await;

    let login_reply = handlers::login(
        State(state.clone()),
        Json(LoginRequest {
            email: "s6@example.com".to_string(),
            password: "correct horse battery staple".to_string(),
        }),
    )
    .await
    .unwrap();
    let old_refresh = login_reply.body.data.refresh_token.clone();

    let refresh_reply = handlers::refresh(
        State(state.clone()),
        Json(RefreshRequest {
            refresh_token: old_refresh.clone(),
        }),
    )
    .await
    .expect("rotation succeeds");
    let new_access = refresh_reply.body.data.access_token.clone();
    let new_refresh = refresh_reply.body.data.refresh_token.clone();
    assert_ne!(new_refresh, old_refresh);

    let replay = handlers::refresh(
        State(state.clone()),
        Json(RefreshRequest {
            refresh_token: old_refresh,
        }),
    )
    .await;
    assert!(matches!(replay, Err(Error::Unauthorized(_))), "the rotated-away token is rejected");

    let validate_reply = handlers::validate(
        State(state.clone()),
        Json(ValidateRequest {
            token: new_access.clone(),
        }),
    )
    .await;
    match validate_reply.body.data {
        ValidateResponse::Valid { valid, .. } => assert!(valid),
        ValidateResponse::Invalid { .. } => panic!("new access token should validate"),
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        format!("Bearer {new_access}").parse().unwrap(),
    );
    handlers::logout(State(state.clone()), headers).await.expect("logout succeeds");

    let post_logout_refresh = handlers::refresh(
        State(state.clone()),
        Json(RefreshRequest {
            refresh_token: new_refresh,
        }),
    )
    .await;
    assert!(
        matches!(post_logout_refresh, Err(Error::Unauthorized(_))),
        "logout revokes every outstanding refresh token for the user"
    );
}
