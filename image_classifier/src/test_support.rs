use crate::{
    error::{ClassifierError, ClassifierResult},
    model::{ClassifierModel, ModelBackend},
    preprocess::ImageTensor,
};
use flate2::{write::GzEncoder, Compression};
use image::{ImageBuffer, Rgb};
use std::{
    fs,
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tempfile::TempDir;

/// Fresh, empty directory, removed when the returned guard drops.
pub fn scratch_dir(name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("image-classifier-{}-", name))
        .tempdir()
        .unwrap()
}

/// Gzipped tarball holding `files` at its top level.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, data.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Lays out `<root>/<bucket>/<prefix>/model.tar.gz` for a `LocalObjectStore`.
pub fn publish_archive(root: &Path, bucket: &str, prefix: &str, archive: &[u8]) {
    let dir = root.join(bucket).join(prefix);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("model.tar.gz"), archive).unwrap();
}

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb(color));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// Model returning the same logits for every input.
pub struct FixedLogits(pub Vec<f32>);

impl ClassifierModel for FixedLogits {
    fn forward(&self, input: &ImageTensor) -> ClassifierResult<Vec<f32>> {
        if input.shape() != [1, 3, 224, 224] {
            return Err(ClassifierError::Inference(format!(
                "unexpected input shape {:?}",
                input.shape()
            )));
        }
        Ok(self.0.clone())
    }
}

pub struct FailingModel;

impl ClassifierModel for FailingModel {
    fn forward(&self, _input: &ImageTensor) -> ClassifierResult<Vec<f32>> {
        Err(ClassifierError::Inference("session run failed".to_string()))
    }
}

/// Backend that checks the model file exists and counts how often it loads.
#[derive(Clone)]
pub struct StubBackend {
    pub logits: Vec<f32>,
    pub loads: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            logits,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelBackend for StubBackend {
    fn load(&self, path: &Path) -> ClassifierResult<Box<dyn ClassifierModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !path.is_file() {
            return Err(crate::error::ModelLoadError::Runtime {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            }
            .into());
        }
        Ok(Box::new(FixedLogits(self.logits.clone())))
    }
}
