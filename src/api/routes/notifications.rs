//! Notification API: creation, listing, lifecycle, ack callbacks and
//! API-key management.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::alerting::AlertSender;
use crate::api::middleware::auth::{hash_key, AdminAccess, ReadAccess, WriteAccess};
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::notify::types::{
    AckMethod, AcknowledgeRequest, Notification, NotificationFilter, NotificationRequest,
    NotificationTarget, TargetType,
};
use crate::store::ApiKeyRow;

/// POST /api/notifications  (requires `notifications:write`)
pub async fn create_notification(
    State(state): State<ApiState>,
    _auth: WriteAccess,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    let notification = state.notifications.create(request).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// GET /api/notifications  (requires `notifications:read`)
pub async fn list_notifications(
    State(state): State<ApiState>,
    _auth: ReadAccess,
    Query(filter): Query<NotificationFilter>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.list(&filter).await?))
}

#[derive(Debug, Serialize)]
pub struct NotificationDetail {
    #[serde(flatten)]
    pub notification: Notification,
    pub targets: Vec<NotificationTarget>,
}

/// GET /api/notifications/:id  (requires `notifications:read`)
pub async fn get_notification(
    State(state): State<ApiState>,
    _auth: ReadAccess,
    Path(id): Path<i64>,
) -> ApiResult<Json<NotificationDetail>> {
    let notification = state.notifications.get(id).await?;
    let targets = state.notifications.get_targets(id).await?;

    Ok(Json(NotificationDetail {
        notification,
        targets,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeBody {
    pub acknowledged_by: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// POST /api/notifications/:id/acknowledge  (requires `notifications:write`)
pub async fn acknowledge_notification(
    State(state): State<ApiState>,
    _auth: WriteAccess,
    Path(id): Path<i64>,
    Json(body): Json<AcknowledgeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = AcknowledgeRequest {
        notification_id: id,
        acknowledged_by: body.acknowledged_by,
        comment: body.comment,
    };

    state
        .notifications
        .acknowledge(&request, AckMethod::Api, None)
        .await?;

    Ok(Json(json!({"status": "acknowledged"})))
}

/// POST /api/notifications/:id/resolve  (requires `notifications:write`)
pub async fn resolve_notification(
    State(state): State<ApiState>,
    _auth: WriteAccess,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.notifications.resolve(id).await?;
    Ok(Json(json!({"status": "resolved"})))
}

/// DELETE /api/notifications/:id  (requires `notifications:write`)
pub async fn delete_notification(
    State(state): State<ApiState>,
    _auth: WriteAccess,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.notifications.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/notifications/callbacks/:target_type/:target_id
///
/// Webhook acknowledgement ingress. The body is verified against the
/// target's shared secret via `X-Signature` (HMAC-SHA-256 hex) when one is
/// configured.
pub async fn callback(
    State(state): State<ApiState>,
    Path((target_type, target_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let target_type = TargetType::parse(&target_type)
        .ok_or_else(|| ApiError::NotFound(format!("target type {target_type}")))?;

    let sender = state
        .notifications
        .sender_for(target_type)
        .ok_or_else(|| ApiError::NotFound(format!("target type {target_type}")))?;

    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !sender.verify_signature(&body, signature) {
        return Err(ApiError::Unauthorized("bad callback signature".to_string()));
    }

    let request = state
        .notifications
        .handle_callback(target_type, &target_id, &body)
        .await?;

    Ok(Json(json!({
        "acknowledged": true,
        "notification_id": request.notification_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub service_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub expires_after_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    pub key_id: String,

    /// Plaintext secret, shown exactly once
    pub key: String,

    pub service_name: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

/// POST /api/notifications/api-keys  (requires `notifications:admin`)
pub async fn create_api_key(
    State(state): State<ApiState>,
    _auth: AdminAccess,
    Json(request): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreatedApiKey>)> {
    let (key_id, secret) = {
        let mut rng = rand::thread_rng();
        let key_id = format!("srk_{}", hex::encode(rng.gen::<[u8; 6]>()));
        let secret = hex::encode(rng.gen::<[u8; 32]>());
        (key_id, secret)
    };

    let now = Utc::now();
    let expires_at = request
        .expires_after_secs
        .map(|secs| now + Duration::seconds(secs as i64));

    state
        .store
        .create_api_key(&ApiKeyRow {
            key_id: key_id.clone(),
            key_hash: hash_key(&secret),
            service_name: request.service_name.clone(),
            permissions: request.permissions.clone(),
            created_at: now,
            expires_at,
            last_used_at: None,
        })
        .await?;

    info!("created api key {} for {}", key_id, request.service_name);

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKey {
            key_id,
            key: secret,
            service_name: request.service_name,
            permissions: request.permissions,
            expires_at,
        }),
    ))
}

/// DELETE /api/notifications/api-keys/:key_id  (requires `notifications:admin`)
pub async fn revoke_api_key(
    State(state): State<ApiState>,
    _auth: AdminAccess,
    Path(key_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.revoke_api_key(&key_id).await?;
    info!("revoked api key {}", key_id);
    Ok(StatusCode::NO_CONTENT)
}
