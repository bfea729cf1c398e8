//! Webhook reminder notifier.
//!
//! Posts reminder and event registrations as JSON tagged with `kind`. When a
//! secret is configured the body is signed with HMAC-SHA256 over
//! `"{timestamp}.{body}"`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use super::{NotificationError, ReminderNotifier, ReminderRequest};
use crate::models::Event;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WebhookPayload<'a> {
    Reminder(&'a ReminderRequest),
    Event(&'a Event),
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: url::Url,
    secret: Option<String>,
}

impl WebhookNotifier {
    /// Creates a notifier posting to `url`, which must be http or https
    pub fn new(url: &str, secret: Option<String>) -> Result<Self, NotificationError> {
        let url = validate_url(url)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| NotificationError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            secret,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// HMAC-SHA256 signature of a payload, hex encoded
    fn generate_signature(
        secret: &str,
        timestamp: &str,
        payload: &[u8],
    ) -> Result<String, NotificationError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| NotificationError::Config(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn post(
        &self,
        request_id: Uuid,
        payload: &WebhookPayload<'_>,
    ) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(payload)?;
        let timestamp = Utc::now().timestamp().to_string();

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .header("X-Cadence-Timestamp", &timestamp)
            .header("X-Cadence-Request-ID", request_id.to_string());

        if let Some(ref secret) = self.secret {
            let signature = Self::generate_signature(secret, &timestamp, &body)?;
            request = request.header("X-Cadence-Signature", format!("sha256={}", signature));
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                NotificationError::Timeout
            } else if e.is_connect() {
                NotificationError::Connect
            } else {
                NotificationError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Parses a webhook URL, accepting only http and https
pub fn validate_url(raw: &str) -> Result<url::Url, NotificationError> {
    if raw.trim().is_empty() {
        return Err(NotificationError::Config("Webhook URL is required".to_string()));
    }

    let parsed = url::Url::parse(raw)
        .map_err(|_| NotificationError::Config("Invalid webhook URL format".to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(NotificationError::Config(
            "Webhook URL must use HTTP or HTTPS".to_string(),
        ));
    }

    Ok(parsed)
}

#[async_trait]
impl ReminderNotifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn schedule_reminder(&self, reminder: &ReminderRequest) -> Result<(), NotificationError> {
        self.post(reminder.event_id, &WebhookPayload::Reminder(reminder)).await
    }

    async fn schedule_notification(&self, event: &Event) -> Result<(), NotificationError> {
        self.post(event.id, &WebhookPayload::Event(event)).await
    }
}
