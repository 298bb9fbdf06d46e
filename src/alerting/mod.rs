//! Alert dispatchers.
//!
//! Each dispatcher renders a notification into a target-specific payload,
//! signs it when a secret is configured, POSTs it with bounded retries and
//! keeps its own cooldown map so one logical alert cannot spam operators.
//! Recovery paths erase cooldown keys before firing, which is the only way
//! other components touch dispatcher state.

pub mod cooldown;
pub mod discord;
pub mod error;
pub mod webhook;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::notify::types::{AcknowledgeRequest, Notification, TargetType};

pub use cooldown::{CooldownKey, CooldownTracker};
pub use discord::DiscordSender;
pub use error::{AlertError, AlertResult};
pub use webhook::WebhookSender;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of one successful delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// `id` field of the target's 2xx response body, when present
    pub external_id: Option<String>,

    /// Raw 2xx response body
    pub response_body: String,
}

/// One outbound alert target type.
///
/// Implementations own their cooldown map; `clear_node_cooldowns` is the
/// recovery-path key-erase.
#[async_trait]
pub trait AlertSender: Send + Sync {
    fn target_type(&self) -> TargetType;

    async fn send(&self, notification: &Notification) -> AlertResult<Delivery>;

    fn clear_node_cooldowns(&self, node_id: &str);

    /// Parse an inbound acknowledgement callback body.
    fn parse_acknowledgement(&self, body: &[u8]) -> AlertResult<AcknowledgeRequest>;

    /// Verify an inbound callback signature. Targets without a configured
    /// secret accept everything.
    fn verify_signature(&self, body: &[u8], signature_hex: &str) -> bool;
}

/// Default outbound webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub id: i64,
    pub alert_id: String,
    pub level: String,
    pub title: String,
    pub message: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
}

impl AlertPayload {
    pub fn from_notification(notification: &Notification, verification_url: Option<String>) -> Self {
        let metadata = if notification.metadata.is_empty() {
            None
        } else {
            serde_json::to_value(&notification.metadata).ok()
        };

        Self {
            id: notification.id,
            alert_id: notification.alert_id.clone(),
            level: notification.level.to_string(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            created_at: notification.created_at.to_rfc3339(),
            node_id: notification.node_id.clone(),
            service_name: notification.service_name.clone(),
            metadata,
            verification_url,
        }
    }
}

pub(crate) fn cooldown_key(notification: &Notification) -> CooldownKey {
    CooldownKey {
        node_id: notification.node_id.clone().unwrap_or_default(),
        title: notification.title.clone(),
        service_name: notification.service_name.clone().unwrap_or_default(),
    }
}

/// Lower-case hex HMAC-SHA-256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex HMAC-SHA-256 signature.
pub fn verify_payload(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(provided.as_slice()).into()
}
