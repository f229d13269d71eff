use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    if state.pipeline.is_ready() {
        (
            StatusCode::OK,
            Json(Status {
                status: "Available".into(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Status {
                status: "Loading".into(),
            }),
        )
    }
}
