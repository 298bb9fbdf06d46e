//! Generic webhook dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use super::cooldown::CooldownTracker;
use super::error::{AlertError, AlertResult};
use super::{cooldown_key, sign_payload, verify_payload, AlertPayload, AlertSender, Delivery};
use crate::config::WebhookConfig;
use crate::notify::types::{AcknowledgeRequest, Notification, TargetType};

pub struct WebhookSender {
    config: WebhookConfig,
    client: Client,
    cooldowns: CooldownTracker,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            cooldowns: CooldownTracker::new(Duration::from_secs(config.cooldown_secs)),
            client,
            config,
        }
    }

    /// Render the payload: the notification as JSON by default, or the
    /// configured template with `{{json}}` / `{{field}}` placeholders.
    /// Template output must itself be valid JSON.
    fn render(&self, payload: &AlertPayload) -> AlertResult<Vec<u8>> {
        let value = serde_json::to_value(payload)
            .map_err(|e| AlertError::InvalidJson(e.to_string()))?;

        let Some(template) = &self.config.template else {
            return serde_json::to_vec(&value).map_err(|e| AlertError::InvalidJson(e.to_string()));
        };

        let rendered = render_template(template, &value)?;

        serde_json::from_slice::<serde_json::Value>(rendered.as_bytes())
            .map_err(|e| AlertError::InvalidJson(e.to_string()))?;

        Ok(rendered.into_bytes())
    }

    async fn post_with_retries(&self, body: Vec<u8>) -> AlertResult<Delivery> {
        let mut last_failure = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            let mut request = self.client.post(&self.config.url).body(body.clone());

            if let Some(secret) = &self.config.secret {
                request = request.header(
                    self.config.signature_header.as_str(),
                    sign_payload(secret, &body),
                );
            }

            let mut content_type_overridden = false;
            for (name, value) in &self.config.headers {
                if name.eq_ignore_ascii_case("content-type") {
                    content_type_overridden = true;
                }
                request = request.header(name.as_str(), value.as_str());
            }
            if !content_type_overridden {
                request = request.header("Content-Type", "application/json");
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let response_body = response.text().await.unwrap_or_default();
                    let external_id = extract_external_id(&response_body);
                    debug!("webhook delivered on attempt {}", attempt + 1);

                    return Ok(Delivery {
                        external_id,
                        response_body,
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    last_failure = response.text().await.unwrap_or_default();
                    warn!(
                        "webhook attempt {} failed with status {}",
                        attempt + 1,
                        status
                    );
                }
                Err(e) => {
                    last_failure = e.to_string();
                    warn!("webhook attempt {} failed: {}", attempt + 1, e);
                }
            }
        }

        Err(AlertError::Http(last_failure))
    }
}

#[async_trait]
impl AlertSender for WebhookSender {
    fn target_type(&self) -> TargetType {
        TargetType::Webhook
    }

    #[instrument(skip(self, notification), fields(title = %notification.title))]
    async fn send(&self, notification: &Notification) -> AlertResult<Delivery> {
        if !self.config.enabled {
            return Err(AlertError::Disabled);
        }

        if !self.cooldowns.check_and_touch(cooldown_key(notification)) {
            debug!("webhook alert suppressed by cooldown");
            return Err(AlertError::Cooldown);
        }

        let payload = AlertPayload::from_notification(notification, None);
        let body = self.render(&payload)?;

        self.post_with_retries(body).await
    }

    fn clear_node_cooldowns(&self, node_id: &str) {
        self.cooldowns.clear_node(node_id);
    }

    fn parse_acknowledgement(&self, body: &[u8]) -> AlertResult<AcknowledgeRequest> {
        serde_json::from_slice(body).map_err(|e| AlertError::BadAcknowledgement(e.to_string()))
    }

    fn verify_signature(&self, body: &[u8], signature_hex: &str) -> bool {
        match &self.config.secret {
            Some(secret) => verify_payload(secret, body, signature_hex),
            None => true,
        }
    }
}

fn extract_external_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Expand `{{json}}` and `{{field}}` placeholders against the payload
/// object. String fields are inserted JSON-escaped without the surrounding
/// quotes so they compose inside quoted template positions; everything else
/// is inserted as JSON.
fn render_template(template: &str, payload: &serde_json::Value) -> AlertResult<String> {
    let placeholder =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static regex");

    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for capture in placeholder.captures_iter(template) {
        let whole = capture.get(0).expect("capture 0 always present");
        let name = &capture[1];

        out.push_str(&template[last..whole.start()]);

        if name == "json" {
            out.push_str(&payload.to_string());
        } else {
            let value = payload
                .get(name)
                .ok_or_else(|| AlertError::Template(format!("unknown field {name:?}")))?;

            match value {
                serde_json::Value::String(s) => {
                    let quoted = serde_json::Value::String(s.clone()).to_string();
                    out.push_str(&quoted[1..quoted.len() - 1]);
                }
                other => out.push_str(&other.to_string()),
            }
        }

        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}
