use crate::{
    error::{ClassifierError, ClassifierResult, ModelLoadError},
    model::{ClassifierModel, ModelBackend},
    preprocess::ImageTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{path::Path, sync::Mutex};

/// Loads graphs with ONNX Runtime on the default CPU execution provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtBackend;

impl ModelBackend for OrtBackend {
    fn load(&self, path: &Path) -> ClassifierResult<Box<dyn ClassifierModel>> {
        let model = OrtModel::from_file(path).map_err(|e| ModelLoadError::Runtime {
            path: path.to_path_buf(),
            reason: format!(
                "{}; the model file must hold an ONNX graph whatever its extension, \
                 TorchScript exports have to be converted to ONNX first",
                e
            ),
        })?;
        Ok(Box::new(model))
    }
}

pub struct OrtModel {
    session: Mutex<Session>,
    output_name: String,
}

impl OrtModel {
    /// Sessions are inference only; the graph is already in evaluation mode.
    pub fn from_file(path: &Path) -> Result<Self, ort::Error> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .unwrap_or_else(|| "output0".to_string());

        tracing::info!(
            "Created ONNX session for {:?} with output {}",
            path,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl ClassifierModel for OrtModel {
    fn forward(&self, input: &ImageTensor) -> ClassifierResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ClassifierError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs.get(&self.output_name).ok_or_else(|| {
            ClassifierError::Inference(format!("model has no output {}", self.output_name))
        })?;
        let (_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}
