//! Router assembly

mod ask;
mod conversations;
mod export;
mod graph;
mod thoughts;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full HTTP surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/thoughts", post(thoughts::capture).get(thoughts::list))
        .route("/thoughts/{id}", delete(thoughts::remove))
        .route("/thoughts/{id}/related", get(thoughts::related))
        .route("/ask", post(ask::ask))
        .route(
            "/conversations",
            post(conversations::create).get(conversations::list),
        )
        .route(
            "/conversations/{id}",
            get(conversations::get_one)
                .put(conversations::update)
                .delete(conversations::remove),
        )
        .route(
            "/conversations/{id}/messages",
            post(conversations::send_message),
        )
        .route("/graph", get(graph::theme_graph))
        .route("/export", get(export::export))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<engram_core::Health> {
    Json(state.engine.health())
}
