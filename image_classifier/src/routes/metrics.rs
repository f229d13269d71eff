use crate::server::SharedState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

pub async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
