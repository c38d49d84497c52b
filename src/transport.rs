//! SMTP and FCM delivery transports (§4.7 step 6).
//!
//! Each transport classifies its own failures so the worker runtime can
//! apply the retryable/non-retryable split without knowing transport
//! internals: 4xx-equivalent responses are non-retryable, 5xx/timeout/
//! connection-refused are retryable.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Whether a transport failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    RetryableFailure,
    NonRetryableFailure,
}

/// A rendered email ready for delivery.
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A rendered push notification ready for delivery.
pub struct PushMessage {
    pub to_token: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> DeliveryOutcome;
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, message: &PushMessage) -> DeliveryOutcome;
}

/// `lettre`-backed SMTP transport.
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

impl SmtpEmailTransport {
    pub fn new(
        host: &str,
        port: u16,
        user: Option<&str>,
        password: Option<&str>,
        from: &str,
        timeout: Duration,
    ) -> Result<Self, crate::error::Error> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| crate::error::Error::Internal(format!("smtp config: {e}")))?
            .port(port)
            .timeout(Some(timeout));

        if let (Some(user), Some(password)) = (user, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), password.to_string()));
        }

        let from = from
            .parse()
            .map_err(|e| crate::error::Error::Internal(format!("invalid SMTP_FROM: {e}")))?;

        Ok(Self {
            mailer: builder.build(),
            from,
            timeout,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
        let to: Mailbox = match message.to.parse() {
            Ok(addr) => addr,
            Err(_) => return DeliveryOutcome::NonRetryableFailure,
        };

        let email = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .body(message.body.clone())
        {
            Ok(email) => email,
            Err(_) => return DeliveryOutcome::NonRetryableFailure,
        };

        match tokio::time::timeout(self.timeout, self.mailer.send(email)).await {
            Err(_) => DeliveryOutcome::RetryableFailure, // deadline exceeded
            Ok(Ok(_)) => DeliveryOutcome::Sent,
            Ok(Err(e)) => classify_smtp_error(&e),
        }
    }
}

fn classify_smtp_error(e: &lettre::transport::smtp::Error) -> DeliveryOutcome {
    if e.is_permanent() {
        DeliveryOutcome::NonRetryableFailure
    } else {
        DeliveryOutcome::RetryableFailure
    }
}

/// FCM HTTP push transport.
pub struct FcmPushTransport {
    client: reqwest::Client,
    server_key: String,
    timeout: Duration,
}

impl FcmPushTransport {
    pub fn new(server_key: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_key,
            timeout,
        }
    }
}

#[async_trait]
impl PushTransport for FcmPushTransport {
    async fn send(&self, message: &PushMessage) -> DeliveryOutcome {
        let body = serde_json::json!({
            "to": message.to_token,
            "notification": { "title": message.title, "body": message.body },
        });

        let request = self
            .client
            .post("https://fcm.googleapis.com/fcm/send")
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .timeout(self.timeout);

        match request.send().await {
            Err(e) if e.is_timeout() => DeliveryOutcome::RetryableFailure,
            Err(_) => DeliveryOutcome::RetryableFailure, // connection refused etc.
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryOutcome::Sent
                } else if status.is_client_error() {
                    DeliveryOutcome::NonRetryableFailure
                } else {
                    DeliveryOutcome::RetryableFailure
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_outcome_equality() {
        assert_eq!(DeliveryOutcome::Sent, DeliveryOutcome::Sent);
        assert_ne!(DeliveryOutcome::Sent, DeliveryOutcome::RetryableFailure);
    }
}
