use crate::chat::{client_key, ChatService};
use crate::config::Config;
use crate::error::ChatError;
use crate::types::ChatApiRequest;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

/// HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chat: Arc<ChatService>,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors_permissive = state.config.server.cors_permissive;
    let metrics_enabled = state.config.metrics.enabled;

    let mut app = Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Chat turn
        .route("/api/chat", post(chat_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    let app = app.layer(TraceLayer::new_for_http());
    let app = if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    app.with_state(state)
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "upstream_configured": state.chat.upstream_configured(),
        "model": state.chat.provider().map(|p| p.model().to_string()),
    }))
}

/// GET /metrics (Prometheus format)
pub async fn metrics_handler() -> Response {
    match crate::metrics::METRICS.render() {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatApiRequest>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(body)) => {
            let key = client_key(&headers);
            state.chat.handle(&key, body.message.as_deref()).await
        }
        Err(rejection) => {
            debug!("Rejected chat body: {}", rejection.body_text());
            Err(ChatError::InvalidRequest("Invalid request body".to_string()))
        }
    };

    let response = match result {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => e.into_response(),
    };

    crate::metrics::METRICS
        .chat_requests_total
        .with_label_values(&[response.status().as_str()])
        .inc();

    response
}
