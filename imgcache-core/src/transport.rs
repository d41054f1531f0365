//! HTTP transport seam for image bodies.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{FetchError, Result};

/// Fetches the raw body for an image URL.
#[async_trait::async_trait]
pub trait ImageTransport: Send + Sync + 'static {
    async fn get(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Plain HTTP GET: no custom headers, no retries, the whole body is the image.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                FetchError::Internal(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ImageTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>> {
        debug!(%url, "requesting image");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status}: {url}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        debug!(%url, bytes = bytes.len(), "image body received");
        Ok(bytes.to_vec())
    }
}
