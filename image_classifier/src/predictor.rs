use crate::{
    bundle::ModelBundle,
    error::{ClassifierError, ClassifierResult},
    preprocess::ImageTensor,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Top class and its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

/// Normalized exponential over `logits`, shifted by the maximum so large
/// scores do not overflow.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest probability; the first one wins on ties.
fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, item| if item.1 > best.1 { item } else { best })
}

pub fn predict(tensor: &ImageTensor, bundle: &ModelBundle) -> ClassifierResult<Prediction> {
    tracing::info!("Calling prediction on model");
    let start_time = Instant::now();
    let logits = bundle.model.forward(tensor)?;
    tracing::info!("Inference time: {:?}", start_time.elapsed());

    if logits.is_empty() {
        return Err(ClassifierError::Inference(
            "model returned no scores".to_string(),
        ));
    }
    if logits.iter().any(|x| !x.is_finite()) {
        return Err(ClassifierError::Inference(
            "model returned non-finite scores".to_string(),
        ));
    }
    if logits.len() != bundle.labels.len() {
        tracing::error!(
            "Model returned {} scores for {} labels",
            logits.len(),
            bundle.labels.len()
        );
        return Err(ClassifierError::IndexMisalignment {
            outputs: logits.len(),
            labels: bundle.labels.len(),
        });
    }

    let probabilities = softmax(&logits);
    let (index, confidence) = argmax(&probabilities)
        .ok_or_else(|| ClassifierError::Inference("empty probability vector".to_string()))?;
    let label = bundle
        .labels
        .get(index)
        .ok_or(ClassifierError::IndexMisalignment {
            outputs: logits.len(),
            labels: bundle.labels.len(),
        })?
        .clone();

    tracing::info!("Predicted class is {}", label);
    tracing::info!("Softmax confidence score is {}", confidence);

    Ok(Prediction { label, confidence })
}
