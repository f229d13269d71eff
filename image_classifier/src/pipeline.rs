use crate::{
    bundle::{BundleLoader, BundleManifest, ModelBundle},
    error::{ClassifierError, ClassifierResult},
    fetcher::ImageSource,
    predictor::{predict, Prediction},
    preprocess::Preprocessor,
    store::StorageLocation,
};
use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub fetch: Duration,
    pub preprocess: Duration,
    pub inference: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub prediction: Prediction,
    pub timings: StageTimings,
}

/// Owns everything one request needs. The bundle is loaded at most once and
/// never replaced; a new model version needs a new process.
pub struct ClassifierPipeline {
    loader: BundleLoader,
    location: StorageLocation,
    fetcher: Box<dyn ImageSource>,
    preprocessor: Preprocessor,
    bundle: OnceLock<ModelBundle>,
}

impl ClassifierPipeline {
    pub fn new(
        loader: BundleLoader,
        location: StorageLocation,
        fetcher: Box<dyn ImageSource>,
        preprocessor: Preprocessor,
    ) -> Self {
        Self {
            loader,
            location,
            fetcher,
            preprocessor,
            bundle: OnceLock::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.bundle.get().is_some()
    }

    /// Loads the bundle before the first request arrives.
    pub fn warm_up(&self) -> ClassifierResult<&ModelBundle> {
        let start_time = Instant::now();
        let bundle = self.bundle()?;
        tracing::info!(
            "Model ready with {} classes after {:?}",
            bundle.labels.len(),
            start_time.elapsed()
        );
        Ok(bundle)
    }

    pub fn bundle(&self) -> ClassifierResult<&ModelBundle> {
        if let Some(bundle) = self.bundle.get() {
            return Ok(bundle);
        }

        tracing::info!("Loading model from {:?}", self.location);
        let (bundle, manifest) = self.loader.load(&self.location)?;
        self.check_manifest(&manifest)?;

        Ok(self.bundle.get_or_init(|| bundle))
    }

    /// The bundle declares how it was trained; refuse to serve with a
    /// different preprocessing.
    fn check_manifest(&self, manifest: &BundleManifest) -> ClassifierResult<()> {
        if let Some(normalization) = &manifest.normalization {
            if !normalization.matches(&self.preprocessor.normalization) {
                return Err(ClassifierError::PreprocessingMismatch(format!(
                    "bundle expects {:?}, pipeline uses {:?}",
                    normalization, self.preprocessor.normalization
                )));
            }
        }
        if let Some(resize) = manifest.resize {
            if resize != self.preprocessor.resize {
                return Err(ClassifierError::PreprocessingMismatch(format!(
                    "bundle expects resize {}, pipeline uses {}",
                    resize, self.preprocessor.resize
                )));
            }
        }
        if let Some(crop) = manifest.crop {
            if crop != self.preprocessor.crop {
                return Err(ClassifierError::PreprocessingMismatch(format!(
                    "bundle expects crop {}, pipeline uses {}",
                    crop, self.preprocessor.crop
                )));
            }
        }
        Ok(())
    }

    pub fn classify_url(&self, url: &str) -> ClassifierResult<Classification> {
        let bundle = self.bundle()?;

        let start_time = Instant::now();
        let image_data = self.fetcher.fetch(url)?;
        let fetch = start_time.elapsed();

        let mut classification = self.classify_with(bundle, &image_data)?;
        classification.timings.fetch = fetch;
        Ok(classification)
    }

    pub fn classify_bytes(&self, image_data: &[u8]) -> ClassifierResult<Classification> {
        let bundle = self.bundle()?;
        self.classify_with(bundle, image_data)
    }

    fn classify_with(
        &self,
        bundle: &ModelBundle,
        image_data: &[u8],
    ) -> ClassifierResult<Classification> {
        let start_time = Instant::now();
        let tensor = self.preprocessor.transform(image_data)?;
        let preprocess = start_time.elapsed();

        let start_time = Instant::now();
        let prediction = predict(&tensor, bundle)?;
        let inference = start_time.elapsed();

        Ok(Classification {
            prediction,
            timings: StageTimings {
                fetch: Duration::ZERO,
                preprocess,
                inference,
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        bundle::LoaderSettings,
        store::LocalObjectStore,
        test_support::{png_bytes, publish_archive, scratch_dir, tar_gz, StubBackend},
    };
    use std::{collections::HashMap, path::Path};

    /// Serves canned bytes per URL.
    pub struct StaticImages(pub HashMap<String, Vec<u8>>);

    impl ImageSource for StaticImages {
        fn fetch(&self, url: &str) -> ClassifierResult<Vec<u8>> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ClassifierError::ImageUnavailable(format!("HTTP 404 for {}", url)))
        }
    }

    pub fn images() -> StaticImages {
        let mut images = HashMap::new();
        images.insert(
            "https://images.test/cat.png".to_string(),
            png_bytes(320, 240, [200, 120, 40]),
        );
        images.insert(
            "https://images.test/readme.txt".to_string(),
            b"plain text".to_vec(),
        );
        StaticImages(images)
    }

    pub fn pipeline_with(
        root: &Path,
        files: &[(&str, &str)],
        backend: StubBackend,
    ) -> ClassifierPipeline {
        publish_archive(root, "models", "pets", &tar_gz(files));
        let loader = BundleLoader::new(
            Box::new(LocalObjectStore::new(root.to_path_buf())),
            Box::new(backend),
            LoaderSettings {
                scratch_dir: root.join("model"),
                archive_name: "model.tar.gz".to_string(),
                labels_file: "classes.txt".to_string(),
                manifest_file: "manifest.json".to_string(),
                model_suffixes: vec!["_jit.pth".to_string()],
            },
        );
        ClassifierPipeline::new(
            loader,
            StorageLocation::new("models", "pets"),
            Box::new(images()),
            Preprocessor::default(),
        )
    }

    pub fn pet_pipeline(root: &Path, backend: StubBackend) -> ClassifierPipeline {
        pipeline_with(
            root,
            &[("classes.txt", "cat\ndog\n"), ("pets_jit.pth", "graph")],
            backend,
        )
    }

    #[test]
    fn test_bundle_loads_once_across_predictions() {
        let tmp = scratch_dir("pipeline-once");
        let root = tmp.path();
        let backend = StubBackend::new(vec![2.0, 0.5]);
        let pipeline = pet_pipeline(&root, backend.clone());

        assert!(!pipeline.is_ready());
        pipeline.warm_up().unwrap();
        assert!(pipeline.is_ready());

        for _ in 0..5 {
            let classification = pipeline.classify_url("https://images.test/cat.png").unwrap();
            assert_eq!(classification.prediction.label, "cat");
            assert!((classification.prediction.confidence - 0.818).abs() < 1e-3);
        }
        assert_eq!(backend.load_count(), 1);
    }

    #[test]
    fn test_first_request_loads_lazily() {
        let tmp = scratch_dir("pipeline-lazy");
        let root = tmp.path();
        let backend = StubBackend::new(vec![0.0, 3.0]);
        let pipeline = pet_pipeline(&root, backend.clone());

        let image_data = png_bytes(64, 48, [0, 0, 0]);
        let first = pipeline.classify_bytes(&image_data).unwrap();
        let second = pipeline.classify_bytes(&image_data).unwrap();

        assert_eq!(first.prediction, second.prediction);
        assert_eq!(first.prediction.label, "dog");
        assert_eq!(backend.load_count(), 1);
    }

    #[test]
    fn test_request_errors_leave_bundle_intact() {
        let tmp = scratch_dir("pipeline-isolation");
        let root = tmp.path();
        let backend = StubBackend::new(vec![2.0, 0.5]);
        let pipeline = pet_pipeline(&root, backend.clone());
        pipeline.warm_up().unwrap();

        assert!(matches!(
            pipeline.classify_url("https://images.test/readme.txt"),
            Err(ClassifierError::InvalidImageFormat(_))
        ));
        assert!(matches!(
            pipeline.classify_url("https://images.test/missing.png"),
            Err(ClassifierError::ImageUnavailable(_))
        ));

        let classification = pipeline.classify_url("https://images.test/cat.png").unwrap();
        assert_eq!(classification.prediction.label, "cat");
        assert_eq!(backend.load_count(), 1);
    }

    #[test]
    fn test_mismatched_labels_surface_at_prediction() {
        let tmp = scratch_dir("pipeline-misaligned");
        let root = tmp.path();
        let backend = StubBackend::new(vec![0.1, 0.2, 0.3]);
        let pipeline = pet_pipeline(&root, backend);

        pipeline.warm_up().unwrap();
        assert!(matches!(
            pipeline.classify_url("https://images.test/cat.png"),
            Err(ClassifierError::IndexMisalignment {
                outputs: 3,
                labels: 2
            })
        ));
    }

    #[test]
    fn test_startup_failure_is_reported() {
        let tmp = scratch_dir("pipeline-broken");
        let root = tmp.path();
        let backend = StubBackend::new(vec![2.0, 0.5]);
        let pipeline = pipeline_with(&root, &[("pets_jit.pth", "graph")], backend);

        let err = pipeline.warm_up().unwrap_err();
        assert!(err.is_startup_fatal());
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn test_manifest_normalization_must_match() {
        let tmp = scratch_dir("pipeline-manifest");
        let root = tmp.path();
        let manifest = r#"{"normalization": {"mean": [0.5, 0.5, 0.5], "std": [0.5, 0.5, 0.5]}}"#;
        let pipeline = pipeline_with(
            &root,
            &[
                ("manifest.json", manifest),
                ("classes.txt", "cat\ndog\n"),
                ("pets_jit.pth", "graph"),
            ],
            StubBackend::new(vec![2.0, 0.5]),
        );

        assert!(matches!(
            pipeline.warm_up(),
            Err(ClassifierError::PreprocessingMismatch(_))
        ));
    }

    #[test]
    fn test_manifest_with_training_statistics_is_accepted() {
        let tmp = scratch_dir("pipeline-manifest-ok");
        let root = tmp.path();
        let manifest = r#"{
            "normalization": {"mean": [0.485, 0.456, 0.406], "std": [0.229, 0.224, 0.225]},
            "resize": 256,
            "crop": 224
        }"#;
        let pipeline = pipeline_with(
            &root,
            &[
                ("manifest.json", manifest),
                ("classes.txt", "cat\ndog\n"),
                ("pets_jit.pth", "graph"),
            ],
            StubBackend::new(vec![2.0, 0.5]),
        );

        assert!(pipeline.warm_up().is_ok());
    }
}
