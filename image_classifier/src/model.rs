use crate::{error::ClassifierResult, preprocess::ImageTensor};
use std::path::Path;

/// An evaluation-ready classifier. `forward` returns one raw score per class,
/// in the order of the model's final layer.
pub trait ClassifierModel: Send + Sync + 'static {
    fn forward(&self, input: &ImageTensor) -> ClassifierResult<Vec<f32>>;
}

/// Turns a serialized model file into a [`ClassifierModel`].
pub trait ModelBackend: Send + Sync + 'static {
    fn load(&self, path: &Path) -> ClassifierResult<Box<dyn ClassifierModel>>;
}
