use crate::{
    handler::{handle_event, ProxyEvent, ProxyResponse},
    server::SharedState,
};
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::instrument;

/// Lambda proxy style invocation: the event comes in, the proxy response goes
/// out as the JSON body.
#[instrument(skip(state, event))]
pub async fn invoke(
    State(state): State<SharedState>,
    Json(event): Json<ProxyEvent>,
) -> Result<Json<ProxyResponse>, StatusCode> {
    let pipeline = state.pipeline.clone();
    let response = tokio::task::spawn_blocking(move || handle_event(&pipeline, event))
        .await
        .map_err(|e| {
            tracing::error!("Invocation task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    state.metrics.record_request("/invoke", response.status_code);
    Ok(Json(response))
}
