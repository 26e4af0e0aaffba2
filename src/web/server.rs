//! HTTP router.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handler::{self, TokenErrorResponse};
use super::metadata;
use crate::oauth::{FlowRegistry, IdTokenIssuer};

/// Shared, immutable state of the token service.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FlowRegistry>,
    pub enabled_flows: Arc<HashSet<String>>,
    pub issuer: Arc<IdTokenIssuer>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(metadata::root))
        .route("/.well-known/openid-configuration", get(metadata::openid_configuration))
        .route("/token", post(handler::token))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(TokenErrorResponse::invalid_request("The requested resource does not exist")),
    )
}
