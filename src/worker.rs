//! Worker runtime (C7, spec §4.7): one instance services one queue,
//! consuming with manual ack, de-duplicating against the distributed
//! idempotency marker, rendering via C3, delivering through a breaker-
//! wrapped transport, and escalating exhausted retries to the DLQ.
//!
//! Grounded on the donor's `database::connection_pool` background-task
//! idiom (a `tokio::spawn`'d loop owned by a long-lived struct) for the
//! run loop shape; the retry/backoff math is new — nothing in the donor
//! needed exponential backoff with jitter.

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::broker::{BrokerClient, DeadLetterEnvelope, NotificationEnvelope};
use crate::cache::CacheClient;
use crate::enterprise::audit::AuditWriter;
use crate::error::Result;
use crate::render;
use crate::store::{AuditRow, AuditStatus};
use crate::templates::TemplateResolver;
use crate::transport::{DeliveryOutcome, EmailMessage, EmailTransport, PushMessage, PushTransport};

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(86_400);
const STATUS_TTL: Duration = Duration::from_secs(3600);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

fn idempotency_key(request_id: &str) -> String {
    format!("idempotency:{request_id}")
}

fn status_key(notification_id: &str) -> String {
    format!("notification:{notification_id}")
}

/// What the delivery step did, independent of which transport produced it.
enum Delivered {
    Sent,
    Retryable,
    NonRetryable,
}

/// The notification-type-specific half of the worker: knows how to build a
/// message from the envelope and which breaker resource guards it.
pub enum Dispatch {
    Email {
        transport: std::sync::Arc<dyn EmailTransport>,
    },
    Push {
        transport: std::sync::Arc<dyn PushTransport>,
    },
}

impl Dispatch {
    fn resource(&self) -> &'static str {
        match self {
            Dispatch::Email { .. } => "smtp",
            Dispatch::Push { .. } => "fcm",
        }
    }

    async fn deliver(&self, envelope: &NotificationEnvelope, subject: &str, body: String) -> Delivered {
        let outcome = match self {
            Dispatch::Email { transport } => {
                let Some(to) = envelope.recipient_email.clone() else {
                    return Delivered::NonRetryable;
                };
                transport
                    .send(&EmailMessage {
                        to,
                        subject: subject.to_string(),
                        body,
                    })
                    .await
            }
            Dispatch::Push { transport } => {
                let Some(token) = envelope.push_token.clone() else {
                    return Delivered::NonRetryable;
                };
                transport
                    .send(&PushMessage {
                        to_token: token,
                        title: subject.to_string(),
                        body,
                    })
                    .await
            }
        };
        match outcome {
            DeliveryOutcome::Sent => Delivered::Sent,
            DeliveryOutcome::RetryableFailure => Delivered::Retryable,
            DeliveryOutcome::NonRetryableFailure => Delivered::NonRetryable,
        }
    }

    fn notification_type(&self) -> &'static str {
        match self {
            Dispatch::Email { .. } => "email",
            Dispatch::Push { .. } => "push",
        }
    }
}

/// Consumes one broker queue end to end.
pub struct WorkerRuntime {
    queue: &'static str,
    cache: CacheClient,
    breaker: CircuitBreaker,
    resolver: TemplateResolver,
    broker: BrokerClient,
    audit: AuditWriter,
    dispatch: Dispatch,
}

impl WorkerRuntime {
    pub fn new(
        queue: &'static str,
        cache: CacheClient,
        breaker: CircuitBreaker,
        resolver: TemplateResolver,
        broker: BrokerClient,
        audit: AuditWriter,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            queue,
            cache,
            breaker,
            resolver,
            broker,
            audit,
            dispatch,
        }
    }

    /// Runs forever, consuming `self.queue` with `prefetch` unacknowledged
    /// messages in flight. Each delivery is handled independently so a slow
    /// render or transport call on one message never blocks another.
    pub async fn run(self, prefetch: u16) -> Result<()> {
        let runtime = std::sync::Arc::new(self);
        let consumer_tag = format!("{}-consumer", runtime.queue);
        let mut consumer = runtime
            .broker
            .consume(runtime.queue, prefetch, &consumer_tag)
            .await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(error = %e, queue = runtime.queue, "broker delivery error");
                    continue;
                }
            };

            let runtime = runtime.clone();
            tokio::spawn(async move {
                let delivery_tag = delivery.delivery_tag;
                let envelope: Result<NotificationEnvelope> = serde_json::from_slice(&delivery.data)
                    .map_err(|e| crate::error::Error::Internal(format!("malformed envelope: {e}")));

                match envelope {
                    Ok(envelope) => {
                        if let Err(e) = runtime.handle(&envelope).await {
                            tracing::error!(error = %e, notification_id = %envelope.notification_id, "unhandled worker error, requeueing");
                            let _ = runtime.broker.nack(delivery_tag, true).await;
                            return;
                        }
                        let _ = runtime.broker.ack(delivery_tag).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dropping malformed message, not requeued");
                        let _ = runtime.broker.nack(delivery_tag, false).await;
                    }
                }
            });
        }

        Ok(())
    }

    /// One pass of the §4.7 per-message algorithm. The return value only
    /// distinguishes "ack as-is" (`Ok`, outcome already resolved) from a
    /// bug that should requeue for a fresh attempt (`Err`); retryable
    /// transport failures are handled internally via nack+requeue. Exposed
    /// as `pub` (rather than only reachable through [`WorkerRuntime::run`])
    /// so the `tests/` integration suite can drive one message end to end
    /// without a live broker consumer.
    pub async fn handle(&self, envelope: &NotificationEnvelope) -> Result<()> {
        let key = idempotency_key(&envelope.notification_id);

        if envelope.attempt == 0 {
            let reserved = self
                .cache
                .set_if_absent(&key, b"processing", IDEMPOTENCY_TTL)
                .await
                .unwrap_or(true);

            if !reserved {
                let existing = self.cache.get(&key).await.unwrap_or(None);
                let marker = existing
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or_default();
                match marker.as_str() {
                    "sent" | "failed" => return Ok(()), // duplicate delivery, already terminal
                    _ => {
                        // another worker owns this message; caller requeues.
                        return Err(crate::error::Error::Unavailable(
                            "message already being processed by another worker".into(),
                        ));
                    }
                }
            }
        } else {
            // A republish of the same notification produced by
            // `republish_with_backoff` below — the marker is already
            // "processing" from attempt 0. Re-entering here is the retry
            // itself, not a concurrent duplicate, so it bypasses the
            // `set_if_absent` guard rather than racing it.
            let _ = self.cache.set(&key, b"processing", Some(IDEMPOTENCY_TTL)).await;
        }

        self.update_status(&envelope.notification_id, "pending").await;

        let template = self
            .resolver
            .resolve(&envelope.template_code, &envelope.language, None)
            .await?;

        let variables: std::collections::HashMap<String, Value> =
            envelope.variables.clone().into_iter().collect();

        let subject = template
            .content
            .0
            .get("subject")
            .map(|s| render::render(s, &variables))
            .unwrap_or_default();
        let body_field = template
            .content
            .0
            .get("body")
            .cloned()
            .unwrap_or_default();
        let body = render::render(&body_field, &variables);

        let resource = self.dispatch.resource();
        let allowed = self.breaker.allow(resource).await.unwrap_or(true);

        let delivered = if !allowed {
            Delivered::Retryable
        } else {
            self.dispatch.deliver(envelope, &subject, body).await
        };

        match delivered {
            Delivered::Sent => {
                let _ = self.breaker.record_success(resource).await;
                let _ = self.cache.set(&key, b"sent", Some(IDEMPOTENCY_TTL)).await;
                self.audit.record(AuditRow {
                    trace_id: envelope.notification_id.clone(),
                    user_id: envelope.user_id.clone(),
                    notification_type: self.dispatch.notification_type().to_string(),
                    template_code: envelope.template_code.clone(),
                    status: AuditStatus::Sent,
                    error_message: None,
                    metadata: envelope.metadata.clone().unwrap_or(Value::Null),
                });
                self.update_status(&envelope.notification_id, "delivered").await;
                Ok(())
            }
            Delivered::Retryable if envelope.attempt < MAX_RETRIES => {
                let _ = self.breaker.record_failure(resource).await;
                self.republish_with_backoff(envelope).await
            }
            Delivered::Retryable | Delivered::NonRetryable => {
                let _ = self.breaker.record_failure(resource).await;
                self.escalate_to_dlq(envelope, "retries exhausted or non-retryable failure")
                    .await
            }
        }
    }

    /// Exponential backoff `base * 2^attempt`, capped, with independent
    /// jitter per attempt (§4.7 "Retry schedule"). Re-publishes the
    /// envelope with `attempt` incremented rather than mutating the
    /// in-flight message, since AMQP messages are immutable once published.
    async fn republish_with_backoff(&self, envelope: &NotificationEnvelope) -> Result<()> {
        let exponent = envelope.attempt.min(20);
        let backoff = (BACKOFF_BASE * 2u32.saturating_pow(exponent)).min(BACKOFF_CAP);
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        let mut retried = envelope.clone();
        retried.attempt += 1;
        let payload = serde_json::to_vec(&retried)
            .map_err(|e| crate::error::Error::Internal(format!("envelope serialize: {e}")))?;
        self.broker.publish(self.queue, &payload).await
    }

    async fn escalate_to_dlq(&self, envelope: &NotificationEnvelope, reason: &str) -> Result<()> {
        let _ = self
            .cache
            .set(&idempotency_key(&envelope.notification_id), b"failed", Some(IDEMPOTENCY_TTL))
            .await;

        self.audit.record(AuditRow {
            trace_id: envelope.notification_id.clone(),
            user_id: envelope.user_id.clone(),
            notification_type: self.dispatch.notification_type().to_string(),
            template_code: envelope.template_code.clone(),
            status: AuditStatus::Failed,
            error_message: Some(reason.to_string()),
            metadata: envelope.metadata.clone().unwrap_or(Value::Null),
        });

        let dead_letter = DeadLetterEnvelope {
            original_message: envelope.clone(),
            failure_reason: reason.to_string(),
            failed_at: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&dead_letter)
            .map_err(|e| crate::error::Error::Internal(format!("dead letter serialize: {e}")))?;
        self.broker.publish_dead_letter(&payload).await?;

        self.update_status(&envelope.notification_id, "failed").await;
        Ok(())
    }

    async fn update_status(&self, notification_id: &str, status: &str) {
        let key = status_key(notification_id);
        let current = self.cache.get(&key).await.unwrap_or(None);
        let mut value: Value = current
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("status".to_string(), Value::String(status.to_string()));
        }
        if let Ok(bytes) = serde_json::to_vec(&value) {
            if let Err(e) = self.cache.set(&key, &bytes, Some(STATUS_TTL)).await {
                tracing::debug!(error = %e, notification_id, "best-effort status update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let exponent: u32 = 5;
        let backoff = (BACKOFF_BASE * 2u32.saturating_pow(exponent)).min(BACKOFF_CAP);
        assert_eq!(backoff, BACKOFF_CAP);
    }
}
