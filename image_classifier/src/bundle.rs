use crate::{
    config::ModelConfig,
    error::{ClassifierError, ClassifierResult, ModelLoadError},
    model::{ClassifierModel, ModelBackend},
    preprocess::Normalization,
    store::{ArtifactStore, StorageLocation},
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

/// An executable model and its labels. The label at position `i` names output
/// index `i` of the model's final layer.
pub struct ModelBundle {
    pub model: Box<dyn ClassifierModel>,
    pub labels: Vec<String>,
    pub normalization: Option<Normalization>,
    pub model_path: PathBuf,
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("labels", &self.labels)
            .field("normalization", &self.normalization)
            .field("model_path", &self.model_path)
            .finish_non_exhaustive()
    }
}

/// Optional `manifest.json` shipped next to the model.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct BundleManifest {
    pub model_file: Option<String>,
    pub labels_file: Option<String>,
    pub normalization: Option<Normalization>,
    pub resize: Option<u32>,
    pub crop: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub scratch_dir: PathBuf,
    pub archive_name: String,
    pub labels_file: String,
    pub manifest_file: String,
    pub model_suffixes: Vec<String>,
}

impl From<&ModelConfig> for LoaderSettings {
    fn from(model_config: &ModelConfig) -> Self {
        Self {
            scratch_dir: model_config.scratch_dir.clone(),
            archive_name: model_config.archive_name.clone(),
            labels_file: model_config.labels_file.clone(),
            manifest_file: model_config.manifest_file.clone(),
            model_suffixes: model_config.model_suffixes.clone(),
        }
    }
}

pub struct BundleLoader {
    store: Box<dyn ArtifactStore>,
    backend: Box<dyn ModelBackend>,
    settings: LoaderSettings,
}

impl BundleLoader {
    pub fn new(
        store: Box<dyn ArtifactStore>,
        backend: Box<dyn ModelBackend>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
        }
    }

    /// Downloads, unpacks and deserializes the bundle stored under `location`.
    pub fn load(
        &self,
        location: &StorageLocation,
    ) -> ClassifierResult<(ModelBundle, BundleManifest)> {
        let model_dir = &self.settings.scratch_dir;
        reset_scratch_dir(model_dir)?;

        let local_archive = model_dir.join(&self.settings.archive_name);
        let key = location.key(&self.settings.archive_name);
        tracing::info!(
            "Downloading model from {}/{} to {:?}",
            location.bucket,
            key,
            local_archive
        );
        self.store.fetch(location, &key, &local_archive)?;

        tracing::info!("Opening model archive");
        let extracted = extract_archive(&local_archive, model_dir);
        if let Err(e) = fs::remove_file(&local_archive) {
            tracing::warn!("Failed to remove {:?}: {}", local_archive, e);
        }
        extracted?;

        let manifest = read_manifest(&model_dir.join(&self.settings.manifest_file))?;

        let labels_file = manifest
            .labels_file
            .as_deref()
            .unwrap_or(&self.settings.labels_file);
        let labels = read_labels(&model_dir.join(labels_file))?;
        tracing::info!("Classes are {:?}", labels);

        let model_path = match &manifest.model_file {
            Some(model_file) => {
                let path = model_dir.join(model_file);
                if !path.is_file() {
                    return Err(ClassifierError::ArtifactCorrupt(format!(
                        "Manifest names {:?} but it is not in the archive",
                        model_file
                    )));
                }
                path
            }
            None => find_model_file(model_dir, &self.settings.model_suffixes)?,
        };
        tracing::info!("Model path is {:?}", model_path);

        let model = self.backend.load(&model_path)?;

        let bundle = ModelBundle {
            model,
            labels,
            normalization: manifest.normalization,
            model_path,
        };

        Ok((bundle, manifest))
    }
}

/// Leaves `dir` empty so nothing from a previous bundle version survives.
fn reset_scratch_dir(dir: &Path) -> ClassifierResult<()> {
    if dir.exists() {
        tracing::debug!("Clearing scratch directory {:?}", dir);
        fs::remove_dir_all(dir).map_err(|e| {
            ClassifierError::ArtifactUnavailable(format!(
                "Failed to clear scratch directory {:?}: {}",
                dir, e
            ))
        })?;
    }
    fs::create_dir_all(dir).map_err(|e| {
        ClassifierError::ArtifactUnavailable(format!(
            "Failed to create scratch directory {:?}: {}",
            dir, e
        ))
    })
}

fn extract_archive(archive: &Path, dest: &Path) -> ClassifierResult<()> {
    let file = fs::File::open(archive).map_err(|e| {
        ClassifierError::ArtifactCorrupt(format!("Failed to open {:?}: {}", archive, e))
    })?;
    let gz = GzDecoder::new(file);
    let mut tar = tar::Archive::new(gz);
    tar.unpack(dest)
        .map_err(|e| ClassifierError::ArtifactCorrupt(format!("Failed to extract archive: {}", e)))
}

fn read_manifest(path: &Path) -> ClassifierResult<BundleManifest> {
    if !path.exists() {
        return Ok(BundleManifest::default());
    }
    let content = fs::read_to_string(path).map_err(|e| {
        ClassifierError::ArtifactCorrupt(format!("Failed to read {:?}: {}", path, e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        ClassifierError::ArtifactCorrupt(format!("Invalid manifest {:?}: {}", path, e))
    })
}

/// One label per line, in output-index order.
fn read_labels(path: &Path) -> ClassifierResult<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        ClassifierError::ArtifactCorrupt(format!("Failed to read labels {:?}: {}", path, e))
    })?;
    let labels: Vec<String> = content.lines().map(str::to_string).collect();
    if labels.is_empty() {
        return Err(ClassifierError::ArtifactCorrupt(format!(
            "Label file {:?} is empty",
            path
        )));
    }
    Ok(labels)
}

/// The single top-level file whose name ends with one of `suffixes`.
fn find_model_file(dir: &Path, suffixes: &[String]) -> Result<PathBuf, ModelLoadError> {
    let entries = fs::read_dir(dir).map_err(|e| ModelLoadError::Runtime {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    suffixes
                        .iter()
                        .any(|suffix| !suffix.is_empty() && name.ends_with(suffix.as_str()))
                })
        })
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(ModelLoadError::NoModelFile {
            dir: dir.to_path_buf(),
            suffixes: suffixes.to_vec(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ModelLoadError::AmbiguousModelFile { candidates }),
    }
}
