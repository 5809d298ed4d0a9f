//! Conversation handlers

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{ConversationStatus, EngineError, SendOptions};

use crate::auth::AuthUser;
use crate::error::{with_deadline, ApiResult};
use crate::state::AppState;

const SEND_BUDGET: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub title: Option<String>,
    pub initial_message: Option<String>,
    /// Reserved for client capture context; accepted and ignored here
    #[serde(default)]
    pub context: Option<Value>,
}

/// POST /conversations
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    with_deadline(SEND_BUDGET, async {
        let (conversation, outcome) = state
            .engine
            .create_conversation(&user, body.title, body.initial_message)
            .await?;

        let mut response = json!({
            "id": conversation.id,
            "title": conversation.title,
            "createdAt": conversation.created_at,
        });
        if let Some(outcome) = outcome {
            response["messages"] = json!([outcome.user_message, outcome.assistant_message]);
        }
        Ok((StatusCode::CREATED, Json(response)))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// GET /conversations
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(ConversationStatus::parse_name(raw).ok_or_else(|| {
            EngineError::Validation(format!("unknown status: {raw}"))
        })?),
        None => None,
    };

    let page = state.engine.list_conversations(
        &user,
        status,
        params.limit.unwrap_or(20),
        params.cursor.as_deref(),
    )?;

    let mut body = json!({
        "conversations": page.conversations,
        "hasMore": page.has_more,
    });
    if let Some(cursor) = page.next_cursor {
        body["cursor"] = json!(cursor);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// GET /conversations/{id}
pub async fn get_one(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<GetParams>,
) -> ApiResult<Json<Value>> {
    let page = state
        .engine
        .get_conversation(&user, &id, params.limit.unwrap_or(50), params.cursor.as_deref())
        .await?;

    let mut body = json!({
        "conversation": page.conversation,
        "messages": page.messages,
        "hasMore": page.has_more,
    });
    if let Some(cursor) = page.next_cursor {
        body["cursor"] = json!(cursor);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateBody {
    pub title: Option<String>,
    pub status: Option<String>,
}

/// PUT /conversations/{id}
pub async fn update(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> ApiResult<Json<Value>> {
    let status = match body.status.as_deref() {
        Some(raw) => Some(ConversationStatus::parse_name(raw).ok_or_else(|| {
            EngineError::Validation(format!("unknown status: {raw}"))
        })?),
        None => None,
    };
    state.engine.update_conversation(&user, &id, body.title, status)?;
    Ok(Json(json!({ "message": "conversation updated" })))
}

/// DELETE /conversations/{id}
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.delete_conversation(&user, &id)?;
    Ok(Json(json!({ "message": "conversation deleted" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendBody {
    pub content: String,
    pub time_window: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub include_history: Option<usize>,
}

/// POST /conversations/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> ApiResult<Json<Value>> {
    with_deadline(SEND_BUDGET, async {
        let started = std::time::Instant::now();
        let from_epoch = body
            .time_window
            .as_deref()
            .and_then(|w| engram_core::retrieval::parse_time_window(w, engram_core::now_ms()));

        let outcome = state
            .engine
            .send_message(
                &user,
                &id,
                &body.content,
                SendOptions {
                    from_epoch,
                    tags: body.tags,
                    include_history: body.include_history,
                },
            )
            .await?;

        Ok(Json(json!({
            "userMessage": outcome.user_message,
            "assistantMessage": outcome.assistant_message,
            "processingTime": started.elapsed().as_millis() as u64,
        })))
    })
    .await
}
