use crate::{
    error::ClassifierError,
    handler::{ClassifyRequest, ErrorBody},
    predictor::Prediction,
    server::SharedState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("Prediction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Classifier(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            PredictError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = match &self {
            PredictError::Classifier(err) => ErrorBody::from(err),
            PredictError::Task(err) => ErrorBody {
                error: "internal".to_string(),
                message: err.to_string(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[instrument(skip(state, body))]
pub async fn predict(
    State(state): State<SharedState>,
    body: String,
) -> Result<Json<Prediction>, PredictError> {
    let result = classify(&state, &body).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            tracing::error!("Prediction failed: {}", err);
            err.status_code()
        }
    };
    state.metrics.record_request("/predict", status.as_u16());

    result.map(Json)
}

async fn classify(state: &SharedState, body: &str) -> Result<Prediction, PredictError> {
    let request = ClassifyRequest::from_body(body)?;
    let pipeline = state.pipeline.clone();
    let classification =
        tokio::task::spawn_blocking(move || pipeline.classify_url(&request.url)).await??;

    state.metrics.record_stage_durations(&classification.timings);
    Ok(classification.prediction)
}
