//! Ad-hoc grounded answers

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use engram_core::AskResponse;

use crate::auth::AuthUser;
use crate::error::{with_deadline, ApiResult};
use crate::state::AppState;

const ASK_BUDGET: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AskBody {
    pub query: String,
    pub time_window: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

/// POST /ask
pub async fn ask(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<AskBody>,
) -> ApiResult<Json<AskResponse>> {
    with_deadline(ASK_BUDGET, async {
        let response = state
            .engine
            .ask(
                &user,
                &engram_core::AskRequest {
                    query: body.query,
                    time_window: body.time_window,
                    tags: body.tags,
                    limit: body.limit,
                },
            )
            .await?;
        Ok(Json(response))
    })
    .await
}
