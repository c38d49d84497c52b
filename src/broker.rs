//! RabbitMQ topology and publish/consume wrapper (§6 "Broker topology").
//!
//! Declares the exchange/queue topology idempotently so any service can be
//! first to start; no service owns topology setup exclusively.

use std::sync::Arc;

use dashmap::DashMap;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const EXCHANGE: &str = "notifications.direct";
pub const DLX_EXCHANGE: &str = "dlx.exchange";
pub const EMAIL_QUEUE: &str = "email.queue";
pub const PUSH_QUEUE: &str = "push.queue";
pub const FAILED_QUEUE: &str = "failed.queue";
pub const TEMPLATE_UPDATED_ROUTING_KEY: &str = "template.updated";
const MESSAGE_TTL_MS: i64 = 3_600_000;

fn default_language() -> String {
    "en".to_string()
}

/// Envelope published to `email.queue`/`push.queue` (§4.6 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub notification_id: String,
    pub idempotency_key: String,
    pub user_id: String,
    pub push_token: Option<String>,
    pub recipient_email: Option<String>,
    pub template_code: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub created_by: String,
    pub timestamp: String,
    pub metadata: Option<serde_json::Value>,
    /// Retry attempt count, carried as message data (not mutated in place)
    /// since AMQP messages are immutable once published (§4.7 step 7).
    #[serde(default)]
    pub attempt: u32,
}

/// Envelope published to `failed.queue` once retries are exhausted (§4.7
/// step 7, "Retryable failure with retry_count >= 3").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub original_message: NotificationEnvelope,
    pub failure_reason: String,
    pub failed_at: String,
}

/// `template.updated{code, version, timestamp}` event (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateUpdatedEvent {
    pub code: String,
    pub version: i32,
    pub timestamp: String,
}

/// Messages captured by an in-memory [`BrokerClient`], keyed by routing key.
/// Handed back alongside the client so `tests/` can assert on what got
/// published without a real broker.
#[derive(Clone, Default)]
pub struct PublishedMessages {
    by_routing_key: Arc<DashMap<String, Vec<Vec<u8>>>>,
}

impl PublishedMessages {
    fn record(&self, routing_key: &str, payload: &[u8]) {
        self.by_routing_key
            .entry(routing_key.to_string())
            .or_default()
            .push(payload.to_vec());
    }

    /// Messages published under `routing_key`, oldest first.
    pub fn get(&self, routing_key: &str) -> Vec<Vec<u8>> {
        self.by_routing_key
            .get(routing_key)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, routing_key: &str) -> usize {
        self.get(routing_key).len()
    }
}

#[derive(Clone)]
enum Backend {
    Amqp(Channel),
    Memory(PublishedMessages),
}

/// Thin async wrapper over one `lapin` connection/channel pair in
/// production; an in-process publish recorder via [`BrokerClient::in_memory`]
/// in tests. `consume`/`ack`/`nack` are AMQP-only — the `tests/` suite
/// exercises the worker's per-message algorithm directly rather than
/// through a live consumer stream.
#[derive(Clone)]
pub struct BrokerClient {
    backend: Backend,
}

impl BrokerClient {
    /// Connects and declares the full topology (exchange, DLX, and all
    /// three queues bound with dead-lettering to `DLX_EXCHANGE`).
    pub async fn connect(amqp_url: &str) -> Result<Self> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| Error::Unavailable(format!("broker connect: {e}")))?;
        let channel = connection.create_channel().await?;
        let client = Self {
            backend: Backend::Amqp(channel),
        };
        client.declare_topology().await?;
        Ok(client)
    }

    /// An in-process broker with no external dependency, for the `tests/`
    /// integration suite. Returns the client plus a handle for asserting on
    /// what was published.
    pub fn in_memory() -> (Self, PublishedMessages) {
        let messages = PublishedMessages::default();
        (
            Self {
                backend: Backend::Memory(messages.clone()),
            },
            messages,
        )
    }

    fn channel(&self) -> Result<&Channel> {
        match &self.backend {
            Backend::Amqp(channel) => Ok(channel),
            Backend::Memory(_) => Err(Error::Internal(
                "consume/ack/nack require a live AMQP channel, not the in-memory backend".into(),
            )),
        }
    }

    async fn declare_topology(&self) -> Result<()> {
        let channel = self.channel()?;
        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                DLX_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for queue in [EMAIL_QUEUE, PUSH_QUEUE] {
            self.declare_work_queue(queue).await?;
            channel
                .queue_bind(
                    queue,
                    EXCHANGE,
                    queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        self.declare_queue_plain(FAILED_QUEUE).await?;
        channel
            .queue_bind(
                FAILED_QUEUE,
                DLX_EXCHANGE,
                "failed",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    async fn declare_work_queue(&self, name: &str) -> Result<()> {
        let mut args = FieldTable::default();
        args.insert("x-dead-letter-exchange".into(), DLX_EXCHANGE.into());
        args.insert("x-dead-letter-routing-key".into(), "failed".into());
        args.insert("x-message-ttl".into(), MESSAGE_TTL_MS.into());
        self.channel()?
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;
        Ok(())
    }

    async fn declare_queue_plain(&self, name: &str) -> Result<()> {
        self.channel()?
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Publishes a persistent-mode message with routing key `routing_key`
    /// on [`EXCHANGE`]. Used for both notification envelopes (routing key =
    /// queue name) and `template.updated` events.
    pub async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Amqp(channel) => {
                channel
                    .basic_publish(
                        EXCHANGE,
                        routing_key,
                        BasicPublishOptions::default(),
                        payload,
                        BasicProperties::default().with_delivery_mode(2),
                    )
                    .await?
                    .await?;
                Ok(())
            }
            Backend::Memory(messages) => {
                messages.record(routing_key, payload);
                Ok(())
            }
        }
    }

    /// Publishes directly to the dead-letter exchange's `failed` routing key.
    pub async fn publish_dead_letter(&self, payload: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Amqp(channel) => {
                channel
                    .basic_publish(
                        DLX_EXCHANGE,
                        "failed",
                        BasicPublishOptions::default(),
                        payload,
                        BasicProperties::default().with_delivery_mode(2),
                    )
                    .await?
                    .await?;
                Ok(())
            }
            Backend::Memory(messages) => {
                messages.record("failed", payload);
                Ok(())
            }
        }
    }

    /// Opens a manual-ack consumer on `queue` with the given prefetch count
    /// (§4.7 "prefetch = 10 unacknowledged messages per consumer").
    pub async fn consume(&self, queue: &str, prefetch: u16, consumer_tag: &str) -> Result<Consumer> {
        let channel = self.channel()?;
        channel
            .basic_qos(prefetch, lapin::options::BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel()?
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    /// Negative-acknowledge, optionally requeueing (retryable vs terminal
    /// failure, §4.7 step 7).
    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel()?
            .basic_nack(delivery_tag, BasicNackOptions { requeue, multiple: false })
            .await?;
        Ok(())
    }

    /// Raw liveness check for the health aggregator (§4.8) — does not
    /// round-trip a call, just inspects the channel's connection state.
    pub fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Amqp(channel) => channel.status().connected(),
            Backend::Memory(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_fully_qualified_and_stable() {
        // §9 open question 1/2: push routes through `push.queue`, and queue
        // names carry no prefix indirection.
        assert_eq!(PUSH_QUEUE, "push.queue");
        assert_eq!(EMAIL_QUEUE, "email.queue");
    }
}
