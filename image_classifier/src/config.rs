use crate::{preprocess::Normalization, store::StorageLocation};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.fetcher.validate()?;
        self.preprocessing.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub bucket: String,
    pub prefix: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
    #[serde(default = "default_labels_file")]
    pub labels_file: String,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    #[serde(default = "default_model_suffixes")]
    pub model_suffixes: Vec<String>,
    pub store: StoreConfig,
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp/model")
}

fn default_archive_name() -> String {
    "model.tar.gz".to_string()
}

fn default_labels_file() -> String {
    "classes.txt".to_string()
}

fn default_manifest_file() -> String {
    "manifest.json".to_string()
}

fn default_model_suffixes() -> Vec<String> {
    vec!["_jit.pth".to_string(), "_jit.onnx".to_string()]
}

impl ModelConfig {
    pub fn get_location(&self) -> StorageLocation {
        StorageLocation::new(&self.bucket, &self.prefix)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err("Model bucket is not set (MODEL_BUCKET)".to_string());
        }
        if self.prefix.trim().trim_matches('/').is_empty() {
            return Err("Model prefix is not set (MODEL_PREFIX)".to_string());
        }
        if self.model_suffixes.iter().all(|s| s.is_empty()) {
            return Err("At least one model file suffix is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Http { endpoint: String },
    Local { root: PathBuf },
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl FetcherConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("Fetcher timeout must be greater than zero".to_string());
        }
        if self.max_image_bytes == 0 {
            return Err("Fetcher max_image_bytes must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessingConfig {
    #[serde(default = "default_resize")]
    pub resize: u32,
    #[serde(default = "default_crop")]
    pub crop: u32,
    #[serde(default = "default_mean")]
    pub mean: Vec<f32>,
    #[serde(default = "default_std")]
    pub std: Vec<f32>,
}

fn default_resize() -> u32 {
    256
}

fn default_crop() -> u32 {
    224
}

fn default_mean() -> Vec<f32> {
    Normalization::IMAGENET.mean.to_vec()
}

fn default_std() -> Vec<f32> {
    Normalization::IMAGENET.std.to_vec()
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            resize: default_resize(),
            crop: default_crop(),
            mean: default_mean(),
            std: default_std(),
        }
    }
}

impl PreprocessingConfig {
    pub fn get_normalization(&self) -> Result<Normalization, String> {
        Normalization::try_new(&self.mean, &self.std)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.crop == 0 {
            return Err("Crop size must be greater than zero".to_string());
        }
        if self.crop > self.resize {
            return Err(format!(
                "Crop size {} is larger than the resize target {}",
                self.crop, self.resize
            ));
        }
        self.get_normalization().map(|_| ())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("model.bucket", std::env::var("MODEL_BUCKET").ok())?
        .set_override_option("model.prefix", std::env::var("MODEL_PREFIX").ok())?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}
