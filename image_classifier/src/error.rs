use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("no model file matching {suffixes:?} in {dir:?}")]
    NoModelFile { dir: PathBuf, suffixes: Vec<String> },
    #[error("expected exactly one model file, found {}: {candidates:?}", .candidates.len())]
    AmbiguousModelFile { candidates: Vec<PathBuf> },
    #[error("runtime could not load {path:?}: {reason}")]
    Runtime { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model artifact unavailable: {0}")]
    ArtifactUnavailable(String),
    #[error("Model artifact corrupt: {0}")]
    ArtifactCorrupt(String),
    #[error("Model deserialization failed: {0}")]
    ModelDeserialization(#[from] ModelLoadError),
    #[error("Preprocessing does not match the model bundle: {0}")]
    PreprocessingMismatch(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Image could not be fetched: {0}")]
    ImageUnavailable(String),
    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model produced {outputs} scores but the bundle has {labels} labels")]
    IndexMisalignment { outputs: usize, labels: usize },
}

impl ClassifierError {
    /// Short machine readable name, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::ArtifactUnavailable(_) => "artifact_unavailable",
            ClassifierError::ArtifactCorrupt(_) => "artifact_corrupt",
            ClassifierError::ModelDeserialization(_) => "model_deserialization",
            ClassifierError::PreprocessingMismatch(_) => "preprocessing_mismatch",
            ClassifierError::InvalidRequest(_) => "invalid_request",
            ClassifierError::ImageUnavailable(_) => "image_unavailable",
            ClassifierError::InvalidImageFormat(_) => "invalid_image_format",
            ClassifierError::Inference(_) => "inference_error",
            ClassifierError::IndexMisalignment { .. } => "index_misalignment",
        }
    }

    /// Errors raised while loading the model bundle. The process cannot serve
    /// after any of these.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            ClassifierError::ArtifactUnavailable(_)
                | ClassifierError::ArtifactCorrupt(_)
                | ClassifierError::ModelDeserialization(_)
                | ClassifierError::PreprocessingMismatch(_)
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ClassifierError::InvalidRequest(_) => 400,
            ClassifierError::InvalidImageFormat(_) => 422,
            ClassifierError::ImageUnavailable(_) => 502,
            _ => 500,
        }
    }
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;
