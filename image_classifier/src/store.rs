use crate::{
    config::StoreConfig,
    error::{ClassifierError, ClassifierResult},
};
use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

/// Where a versioned model bundle lives: a bucket and the key prefix under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl StorageLocation {
    pub fn new(bucket: &str, prefix: &str) -> Self {
        Self {
            bucket: bucket.trim().to_string(),
            prefix: prefix.trim().trim_matches('/').to_string(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }
}

/// Retrieves blobs from durable storage into the local filesystem.
pub trait ArtifactStore: Send + Sync + 'static {
    fn fetch(&self, location: &StorageLocation, key: &str, dest: &Path) -> ClassifierResult<()>;
}

pub fn from_config(store_config: &StoreConfig) -> Box<dyn ArtifactStore> {
    match store_config {
        StoreConfig::Http { endpoint } => Box::new(HttpObjectStore::new(endpoint)),
        StoreConfig::Local { root } => Box::new(LocalObjectStore::new(root.to_path_buf())),
    }
}

/// Path-style object store over plain HTTP(S) GETs.
pub struct HttpObjectStore {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn object_url(&self, location: &StorageLocation, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, location.bucket, key)
    }
}

impl ArtifactStore for HttpObjectStore {
    fn fetch(&self, location: &StorageLocation, key: &str, dest: &Path) -> ClassifierResult<()> {
        let url = self.object_url(location, key);
        tracing::debug!("Downloading {}", url);

        let resp = self.agent.get(&url).call().map_err(|e| {
            ClassifierError::ArtifactUnavailable(format!("GET {} failed: {}", url, e))
        })?;

        write_streamed(&mut resp.into_reader(), dest)
    }
}

/// Copies `reader` into `dest`. A partially written file is removed.
fn write_streamed(reader: &mut impl Read, dest: &Path) -> ClassifierResult<()> {
    let mut file = File::create(dest).map_err(|e| {
        ClassifierError::ArtifactUnavailable(format!("Failed to create {:?}: {}", dest, e))
    })?;

    if let Err(e) = io::copy(reader, &mut file) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(dest) {
            tracing::warn!("Failed to remove partial {:?}: {}", dest, remove_err);
        }
        return Err(ClassifierError::ArtifactUnavailable(format!(
            "Failed to write {:?}: {}",
            dest, e
        )));
    }

    Ok(())
}

/// Buckets are directories under `root`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ArtifactStore for LocalObjectStore {
    fn fetch(&self, location: &StorageLocation, key: &str, dest: &Path) -> ClassifierResult<()> {
        let source = self.root.join(&location.bucket).join(key);
        tracing::debug!("Copying {:?}", source);

        let mut file = File::open(&source).map_err(|e| {
            ClassifierError::ArtifactUnavailable(format!("Failed to open {:?}: {}", source, e))
        })?;
        write_streamed(&mut file, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_storage_location_trims_slashes() {
        let location = StorageLocation::new(" models ", "/resnet/v3/");
        assert_eq!(location.bucket, "models");
        assert_eq!(location.prefix, "resnet/v3");
        assert_eq!(location.key("model.tar.gz"), "resnet/v3/model.tar.gz");
    }

    #[test]
    fn test_http_store_builds_path_style_url() {
        let store = HttpObjectStore::new("https://s3.eu-west-1.amazonaws.com/");
        let location = StorageLocation::new("models", "resnet");
        assert_eq!(
            store.object_url(&location, &location.key("model.tar.gz")),
            "https://s3.eu-west-1.amazonaws.com/models/resnet/model.tar.gz"
        );
    }

    #[test]
    fn test_local_store_copies_object() {
        let tmp = scratch_dir("local-store");
        let root = tmp.path();
        fs::create_dir_all(root.join("models/resnet")).unwrap();
        fs::write(root.join("models/resnet/model.tar.gz"), b"archive").unwrap();

        let store = LocalObjectStore::new(root.to_path_buf());
        let location = StorageLocation::new("models", "resnet");
        let dest = root.join("copy.tar.gz");
        store
            .fetch(&location, &location.key("model.tar.gz"), &dest)
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"archive");
    }

    struct BrokenStream {
        sent: bool,
    }

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"\x1f\x8b\x08\x00");
            Ok(4)
        }
    }

    #[test]
    fn test_interrupted_download_leaves_no_file() {
        let tmp = scratch_dir("store-interrupted");
        let dest = tmp.path().join("model.tar.gz");

        let result = write_streamed(&mut BrokenStream { sent: false }, &dest);
        assert!(matches!(result, Err(ClassifierError::ArtifactUnavailable(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_local_store_missing_object_is_unavailable() {
        let tmp = scratch_dir("local-store-missing");
        let root = tmp.path();
        let store = LocalObjectStore::new(root.to_path_buf());
        let location = StorageLocation::new("models", "resnet");

        let result = store.fetch(&location, "resnet/model.tar.gz", &root.join("out"));
        assert!(matches!(result, Err(ClassifierError::ArtifactUnavailable(_))));
    }
}
