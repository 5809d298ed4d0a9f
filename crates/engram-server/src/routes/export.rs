//! Incremental export handler

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use engram_core::ExportBundle;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    /// Epoch ms; 0 (default) is a full export
    pub since: Option<i64>,
}

/// GET /export
pub async fn export(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ExportParams>,
) -> ApiResult<Json<ExportBundle>> {
    let bundle = state.engine.export(&user, params.since.unwrap_or(0))?;
    Ok(Json(bundle))
}
