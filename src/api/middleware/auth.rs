//! API-key authentication for the notification endpoints.
//!
//! Keys are carried in `X-API-Key-ID` / `X-API-Key` headers. The presented
//! secret is SHA-256 hashed and compared to the stored hash in constant
//! time; permission checks ride on the extractor type the handler asks for.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::super::error::ApiError;
use super::super::state::ApiState;
use crate::store::ApiKeyRow;

pub const PERM_READ: &str = "notifications:read";
pub const PERM_WRITE: &str = "notifications:write";
pub const PERM_ADMIN: &str = "notifications:admin";

/// Hex SHA-256 of an API-key secret; the only form ever persisted.
pub fn hash_key(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

async fn validate(parts: &mut Parts, state: &ApiState, permission: &str) -> Result<ApiKeyRow, ApiError> {
    let key_id = parts
        .headers
        .get("X-API-Key-ID")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-API-Key-ID header".to_string()))?;

    let key_value = parts
        .headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-API-Key header".to_string()))?;

    let key = match state.store.get_api_key(key_id).await {
        Ok(key) => key,
        Err(e) if e.is_not_found() => {
            return Err(ApiError::Unauthorized("invalid api key".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };

    let presented = hash_key(key_value);
    let matches: bool = presented
        .as_bytes()
        .ct_eq(key.key_hash.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized("invalid api key".to_string()));
    }

    if key.is_expired(Utc::now()) {
        return Err(ApiError::Unauthorized("api key expired".to_string()));
    }

    if !key.has_permission(permission) {
        return Err(ApiError::Forbidden(format!(
            "api key lacks {permission} permission"
        )));
    }

    if let Err(e) = state.store.touch_api_key(key_id, Utc::now()).await {
        debug!("failed to touch api key {}: {}", key_id, e);
    }

    Ok(key)
}

/// Extractor requiring `notifications:read`
pub struct ReadAccess(pub ApiKeyRow);

/// Extractor requiring `notifications:write`
pub struct WriteAccess(pub ApiKeyRow);

/// Extractor requiring `notifications:admin`
pub struct AdminAccess(pub ApiKeyRow);

#[async_trait]
impl FromRequestParts<ApiState> for ReadAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, ApiError> {
        validate(parts, state, PERM_READ).await.map(ReadAccess)
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for WriteAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, ApiError> {
        validate(parts, state, PERM_WRITE).await.map(WriteAccess)
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for AdminAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, ApiError> {
        validate(parts, state, PERM_ADMIN).await.map(AdminAccess)
    }
}
