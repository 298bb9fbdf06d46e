//! Notification lifecycle: creation, target fan-out, acknowledgement,
//! resolution and expiry.
//!
//! The service sits between the state machine and the dispatchers. A
//! create inserts the notification and its target rows in one transaction,
//! then fans out to the dispatchers asynchronously so slow targets never
//! block ingest.

pub mod error;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::alerting::AlertSender;
use crate::store::SqliteStore;
use error::{NotifyError, NotifyResult};
use types::{
    AckMethod, AcknowledgeRequest, Notification, NotificationFilter, NotificationRequest,
    NotificationTarget, TargetStatus, TargetType,
};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<SqliteStore>,
    senders: Arc<HashMap<TargetType, Arc<dyn AlertSender>>>,
}

impl NotificationService {
    pub fn new(store: Arc<SqliteStore>, senders: Vec<Arc<dyn AlertSender>>) -> Self {
        let senders = senders
            .into_iter()
            .map(|sender| (sender.target_type(), sender))
            .collect();

        Self {
            store,
            senders: Arc::new(senders),
        }
    }

    pub fn sender_for(&self, target_type: TargetType) -> Option<&Arc<dyn AlertSender>> {
        self.senders.get(&target_type)
    }

    pub fn senders(&self) -> impl Iterator<Item = &Arc<dyn AlertSender>> {
        self.senders.values()
    }

    /// Create a notification and schedule its fan-out.
    ///
    /// The notification and one pending row per target are committed before
    /// this returns; delivery happens on a background task.
    #[instrument(skip(self, request), fields(alert_id = %request.alert_id))]
    pub async fn create(&self, request: NotificationRequest) -> NotifyResult<Notification> {
        let notification = self.store.create_notification(&request).await?;

        let service = self.clone();
        let background = notification.clone();
        tokio::spawn(async move {
            service.dispatch(&background).await;
        });

        Ok(notification)
    }

    /// Create and deliver in-line. Used for the shutdown notification and
    /// anywhere the caller needs the fan-out finished before proceeding.
    pub async fn create_and_dispatch(
        &self,
        request: NotificationRequest,
    ) -> NotifyResult<Notification> {
        let notification = self.store.create_notification(&request).await?;
        self.dispatch(&notification).await;
        Ok(notification)
    }

    /// Fan a notification out to all of its targets and record each
    /// outcome. The notification moves `pending → sent` iff at least one
    /// target succeeded; otherwise it stays pending.
    pub async fn dispatch(&self, notification: &Notification) {
        let targets = match self.store.get_notification_targets(notification.id).await {
            Ok(targets) => targets,
            Err(e) => {
                error!("failed to load targets for notification {}: {}", notification.id, e);
                return;
            }
        };

        let mut any_sent = false;

        for target in &targets {
            if target.status != TargetStatus::Pending {
                continue;
            }

            if self.deliver_to_target(notification, target).await {
                any_sent = true;
            }
        }

        if any_sent {
            if let Err(e) = self.store.mark_notification_sent(notification.id).await {
                error!("failed to mark notification {} sent: {}", notification.id, e);
            }
        }
    }

    async fn deliver_to_target(
        &self,
        notification: &Notification,
        target: &NotificationTarget,
    ) -> bool {
        let Some(sender) = self.sender_for(target.target_type) else {
            warn!(
                "no handler for target type {} (notification {})",
                target.target_type, notification.id
            );
            let _ = self
                .store
                .update_target_delivery(
                    notification.id,
                    target.target_type,
                    &target.target_id,
                    TargetStatus::Failed,
                    None,
                    Some("no handler for target type"),
                )
                .await;
            return false;
        };

        match sender.send(notification).await {
            Ok(delivery) => {
                if let Err(e) = self
                    .store
                    .update_target_delivery(
                        notification.id,
                        target.target_type,
                        &target.target_id,
                        TargetStatus::Sent,
                        delivery.external_id.as_deref(),
                        Some(&delivery.response_body),
                    )
                    .await
                {
                    error!("failed to record delivery: {}", e);
                }
                true
            }
            Err(e) if e.is_suppressed() => {
                // Disabled target or cooldown window: not a failure, the
                // target row stays pending
                debug!(
                    "delivery to {} suppressed for notification {}: {}",
                    target.target_type, notification.id, e
                );
                false
            }
            Err(e) => {
                warn!(
                    "delivery to {} failed for notification {}: {}",
                    target.target_type, notification.id, e
                );
                let _ = self
                    .store
                    .update_target_delivery(
                        notification.id,
                        target.target_type,
                        &target.target_id,
                        TargetStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await;
                false
            }
        }
    }

    pub async fn get(&self, id: i64) -> NotifyResult<Notification> {
        Ok(self.store.get_notification(id).await?)
    }

    pub async fn get_targets(&self, id: i64) -> NotifyResult<Vec<NotificationTarget>> {
        Ok(self.store.get_notification_targets(id).await?)
    }

    pub async fn list(&self, filter: &NotificationFilter) -> NotifyResult<Vec<Notification>> {
        Ok(self.store.list_notifications(filter).await?)
    }

    /// Acknowledge a notification. Idempotence-guarded: a second call
    /// yields [`NotifyError::AlreadyAcknowledged`].
    #[instrument(skip(self, request))]
    pub async fn acknowledge(
        &self,
        request: &AcknowledgeRequest,
        method: AckMethod,
        target_id: Option<&str>,
    ) -> NotifyResult<()> {
        self.store
            .acknowledge_notification(
                request.notification_id,
                &request.acknowledged_by,
                method,
                request.comment.as_deref(),
                target_id,
            )
            .await?;
        Ok(())
    }

    pub async fn resolve(&self, id: i64) -> NotifyResult<()> {
        Ok(self.store.resolve_notification(id).await?)
    }

    pub async fn delete(&self, id: i64) -> NotifyResult<()> {
        Ok(self.store.delete_notification(id).await?)
    }

    /// Handle an inbound acknowledgement callback for one target type.
    pub async fn handle_callback(
        &self,
        target_type: TargetType,
        target_id: &str,
        body: &[u8],
    ) -> NotifyResult<AcknowledgeRequest> {
        let sender = self
            .sender_for(target_type)
            .ok_or_else(|| NotifyError::UnknownTargetType(target_type.to_string()))?;

        let request = sender
            .parse_acknowledgement(body)
            .map_err(|e| NotifyError::BadCallback(e.to_string()))?;

        let method = match target_type {
            TargetType::Discord => AckMethod::Discord,
            TargetType::Slack => AckMethod::Slack,
            TargetType::Email => AckMethod::Email,
            _ => AckMethod::Webhook,
        };

        self.acknowledge(&request, method, Some(target_id)).await?;
        Ok(request)
    }
}
