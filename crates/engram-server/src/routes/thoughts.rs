//! Thought capture and listing handlers

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{CaptureRequest, ListThoughts, ThoughtKind};

use crate::auth::AuthUser;
use crate::error::{with_deadline, ApiResult};
use crate::state::AppState;

const CAPTURE_BUDGET: Duration = Duration::from_secs(30);

/// POST /thoughts
pub async fn capture(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CaptureRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    with_deadline(CAPTURE_BUDGET, async {
        let receipt = state.engine.capture(&user, &request).await?;
        Ok((
            StatusCode::CREATED,
            Json(json!({
                "id": receipt.id,
                "createdAt": receipt.created_at,
                "message": "thought captured",
            })),
        ))
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    #[serde(default)]
    pub include_count: bool,
}

/// GET /thoughts
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let kind = match params.kind.as_deref() {
        Some(raw) => Some(ThoughtKind::parse_name(raw).ok_or_else(|| {
            engram_core::EngineError::Validation(format!("unknown type: {raw}"))
        })?),
        None => None,
    };

    let page = state.engine.list_thoughts(
        &user,
        &ListThoughts {
            from: params.from,
            to: params.to,
            tag: params.tag,
            kind,
            limit: params.limit,
            cursor: params.cursor,
            include_count: params.include_count,
        },
    )?;

    let mut body = json!({
        "thoughts": page.thoughts,
        "hasMore": page.has_more,
    });
    if let Some(cursor) = page.cursor {
        body["cursor"] = json!(cursor);
    }
    if let Some(count) = page.total_count {
        body["totalCount"] = json!(count);
    }
    Ok(Json(body))
}

/// GET /thoughts/{id}/related
pub async fn related(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let related = state.engine.related_thoughts(&user, &id)?;
    Ok(Json(json!({
        "thoughtId": id,
        "count": related.len(),
        "related": related,
    })))
}

/// DELETE /thoughts/{id}
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.delete_thought(&user, &id)?;
    Ok(Json(json!({ "message": "thought deleted" })))
}
