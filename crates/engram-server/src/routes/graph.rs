//! Theme graph handler

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use engram_core::ThemeGraph;

use crate::auth::AuthUser;
use crate::error::{with_deadline, ApiResult};
use crate::state::AppState;

const GRAPH_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphParams {
    /// YYYY-MM window; whole history when absent
    pub month: Option<String>,
    pub min_similarity: Option<f64>,
}

/// GET /graph
pub async fn theme_graph(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<GraphParams>,
) -> ApiResult<Json<ThemeGraph>> {
    with_deadline(GRAPH_BUDGET, async {
        let graph = state
            .engine
            .theme_graph(&user, params.month.as_deref(), params.min_similarity)
            .await?;
        Ok(Json(graph))
    })
    .await
}
