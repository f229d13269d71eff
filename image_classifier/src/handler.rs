use crate::{
    error::{ClassifierError, ClassifierResult},
    pipeline::{Classification, ClassifierPipeline},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub url: String,
}

impl ClassifyRequest {
    /// Accepts the request object itself or a JSON string that encodes it.
    pub fn from_value(value: Value) -> ClassifierResult<Self> {
        let value = match value {
            Value::String(encoded) => serde_json::from_str::<Value>(&encoded).map_err(|e| {
                ClassifierError::InvalidRequest(format!("Body is not valid JSON: {}", e))
            })?,
            other => other,
        };
        serde_json::from_value(value)
            .map_err(|e| ClassifierError::InvalidRequest(format!("Invalid request body: {}", e)))
    }

    pub fn from_body(body: &str) -> ClassifierResult<Self> {
        let value = serde_json::from_str::<Value>(body).map_err(|e| {
            ClassifierError::InvalidRequest(format!("Body is not valid JSON: {}", e))
        })?;
        Self::from_value(value)
    }
}

/// API Gateway proxy integration event; only the body is used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&ClassifierError> for ErrorBody {
    fn from(err: &ClassifierError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl ProxyResponse {
    fn json<T: Serialize>(status_code: u16, payload: &T) -> Self {
        let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body,
        }
    }

    pub fn from_result(result: &ClassifierResult<Classification>) -> Self {
        match result {
            Ok(classification) => Self::json(200, &classification.prediction),
            Err(err) => Self::json(err.status_code(), &ErrorBody::from(err)),
        }
    }
}

fn parse_event(event: ProxyEvent) -> ClassifierResult<ClassifyRequest> {
    if event.is_base64_encoded {
        return Err(ClassifierError::InvalidRequest(
            "Base64 encoded bodies are not supported".to_string(),
        ));
    }
    let body = event
        .body
        .ok_or_else(|| ClassifierError::InvalidRequest("Request has no body".to_string()))?;
    ClassifyRequest::from_value(body)
}

/// Runs one proxy invocation end to end. Failures become non-200 responses;
/// the pipeline keeps serving.
pub fn handle_event(pipeline: &ClassifierPipeline, event: ProxyEvent) -> ProxyResponse {
    tracing::info!(
        "Starting event {} {}",
        event.http_method.as_deref().unwrap_or("-"),
        event.path.as_deref().unwrap_or("-")
    );

    let result = parse_event(event).and_then(|request| pipeline.classify_url(&request.url));
    if let Err(err) = &result {
        tracing::error!("Request failed: {}", err);
    }

    ProxyResponse::from_result(&result)
}
