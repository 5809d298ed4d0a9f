//! Auth context
//!
//! Static per-user API keys presented in `x-api-key`. The upstream
//! authorizer role collapses to a key→user map loaded at startup
//! (`ENGRAM_API_KEYS="key1:alice,key2:bob"`); handlers receive the
//! resolved user id and never see the key again.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use engram_core::EngineError;

use crate::error::ApiError;
use crate::state::AppState;

/// The validated user identity for a request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(EngineError::Unauthorized("missing x-api-key header".into()))
            })?;

        match state.api_keys.get(key) {
            Some(user) => Ok(AuthUser(user.clone())),
            None => Err(ApiError(EngineError::Unauthorized("unknown api key".into()))),
        }
    }
}

/// Parse `key:user` pairs from the `ENGRAM_API_KEYS` format.
pub fn parse_api_keys(raw: &str) -> std::collections::HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, user) = pair.trim().split_once(':')?;
            if key.is_empty() || user.is_empty() {
                return None;
            }
            Some((key.to_string(), user.to_string()))
        })
        .collect()
}
