use crate::{
    config::FetcherConfig,
    error::{ClassifierError, ClassifierResult},
};
use std::io::Read;

/// Produces raw image bytes for a URL.
pub trait ImageSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> ClassifierResult<Vec<u8>>;
}

pub struct HttpImageFetcher {
    agent: ureq::Agent,
    max_image_bytes: u64,
}

impl HttpImageFetcher {
    pub fn new(fetcher_config: &FetcherConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(fetcher_config.get_timeout())
            .build();
        Self {
            agent,
            max_image_bytes: fetcher_config.max_image_bytes,
        }
    }
}

fn validate_url(url: &str) -> ClassifierResult<()> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        Err(ClassifierError::InvalidRequest(format!(
            "Unsupported image URL {:?}, expected http or https",
            url
        )))
    }
}

impl ImageSource for HttpImageFetcher {
    fn fetch(&self, url: &str) -> ClassifierResult<Vec<u8>> {
        validate_url(url)?;
        tracing::info!("Fetching image from {}", url);

        let resp = self.agent.get(url.trim()).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                ClassifierError::ImageUnavailable(format!("HTTP {} for {}", code, url))
            }
            ureq::Error::Transport(t) => {
                ClassifierError::ImageUnavailable(format!("Request to {} failed: {}", url, t))
            }
        })?;

        let mut image_data = Vec::new();
        resp.into_reader()
            .take(self.max_image_bytes + 1)
            .read_to_end(&mut image_data)
            .map_err(|e| ClassifierError::ImageUnavailable(format!("Failed to read body: {}", e)))?;

        if image_data.len() as u64 > self.max_image_bytes {
            return Err(ClassifierError::ImageUnavailable(format!(
                "Image larger than {} bytes",
                self.max_image_bytes
            )));
        }

        tracing::debug!("Fetched {} bytes", image_data.len());
        Ok(image_data)
    }
}
