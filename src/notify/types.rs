//! Notification domain types shared between the notification service,
//! the dispatchers and the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(NotificationLevel::Info),
            "warning" => Some(NotificationLevel::Warning),
            "error" => Some(NotificationLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a notification.
///
/// `Resolved` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Acknowledged,
    Resolved,
    Expired,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Acknowledged => "acknowledged",
            NotificationStatus::Resolved => "resolved",
            NotificationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "acknowledged" => Some(NotificationStatus::Acknowledged),
            "resolved" => Some(NotificationStatus::Resolved),
            "expired" => Some(NotificationStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Resolved | NotificationStatus::Expired)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Webhook,
    Discord,
    Slack,
    Msteams,
    Email,
    Sms,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Webhook => "webhook",
            TargetType::Discord => "discord",
            TargetType::Slack => "slack",
            TargetType::Msteams => "msteams",
            TargetType::Email => "email",
            TargetType::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(TargetType::Webhook),
            "discord" => Some(TargetType::Discord),
            "slack" => Some(TargetType::Slack),
            "msteams" => Some(TargetType::Msteams),
            "email" => Some(TargetType::Email),
            "sms" => Some(TargetType::Sms),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a single target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Sent,
    Failed,
    Acknowledged,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Sent => "sent",
            TargetStatus::Failed => "failed",
            TargetStatus::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TargetStatus::Pending),
            "sent" => Some(TargetStatus::Sent),
            "failed" => Some(TargetStatus::Failed),
            "acknowledged" => Some(TargetStatus::Acknowledged),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an acknowledgement reached the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMethod {
    Api,
    Webhook,
    Ui,
    Discord,
    Slack,
    Email,
}

impl AckMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMethod::Api => "api",
            AckMethod::Webhook => "webhook",
            AckMethod::Ui => "ui",
            AckMethod::Discord => "discord",
            AckMethod::Slack => "slack",
            AckMethod::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api" => Some(AckMethod::Api),
            "webhook" => Some(AckMethod::Webhook),
            "ui" => Some(AckMethod::Ui),
            "discord" => Some(AckMethod::Discord),
            "slack" => Some(AckMethod::Slack),
            "email" => Some(AckMethod::Email),
            _ => None,
        }
    }
}

impl std::fmt::Display for AckMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,

    /// Caller-supplied dedup key
    pub alert_id: String,

    pub node_id: Option<String>,
    pub service_name: Option<String>,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One delivery of a notification to one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub notification_id: i64,
    pub target_type: TargetType,
    pub target_id: String,
    pub status: TargetStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub response_data: Option<String>,
}

/// An acknowledgement row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub notification_id: i64,
    pub target_id: Option<String>,
    pub acknowledged_by: String,
    pub acknowledged_at: DateTime<Utc>,
    pub method: AckMethod,
    pub comment: Option<String>,
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub alert_id: String,
    pub node_id: Option<String>,
    pub service_name: Option<String>,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub expire_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Requested deliveries; each becomes one target row
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

/// One requested delivery inside a [`NotificationRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub target_type: TargetType,
    pub target_id: String,
}

/// Parsed acknowledgement callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub notification_id: i64,
    pub acknowledged_by: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Filter parameters for listing notifications
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    pub alert_id: Option<String>,
    pub node_id: Option<String>,
    pub service_name: Option<String>,
    pub level: Option<NotificationLevel>,
    pub status: Option<NotificationStatus>,
    pub acknowledged: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
