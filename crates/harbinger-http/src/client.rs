//! HTTP client fetching pages for preloading

use crate::{HttpConfig, HttpError, Result};
use harbinger::{Fetcher, Page, ResourceKey};
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

/// Parse a key into the URL to request.
///
/// Fragments never reach the server, so they are dropped.
pub fn normalize_url(key: &str) -> Result<Url> {
    let mut url = Url::parse(key)?;
    url.set_fragment(None);
    Ok(url)
}

/// Fetcher issuing one GET per preload
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.user_agent);

        if config.compression {
            builder = builder.gzip(true).brotli(true);
        }

        let client = builder
            .build()
            .map_err(|e| HttpError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Configuration in use
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Fetch a page
    pub async fn get(&self, key: &ResourceKey) -> Result<Page> {
        let url = normalize_url(key.as_str())?;
        debug!("Fetching: {}", url);

        let mut request = self.client.get(url);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        self.handle_response(key, response).await
    }

    async fn handle_response(&self, key: &ResourceKey, response: Response) -> Result<Page> {
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Http {
                status: status.as_u16(),
            });
        }

        if response.url().as_str() != key.as_str() {
            debug!("{} resolved to {}", key, response.url());
        }

        let payload = response.bytes().await?;
        Ok(Page::new(key.clone(), payload).with_status(status.as_u16()))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, key: &ResourceKey) -> harbinger::Result<Page> {
        self.get(key).await.map_err(|e| e.into_preload_error(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_fragment() {
        let url = normalize_url("https://example.com/about?tab=1#team").unwrap();
        assert_eq!(url.as_str(), "https://example.com/about?tab=1");
    }

    #[test]
    fn test_normalize_rejects_relative() {
        assert!(matches!(
            normalize_url("/about"),
            Err(HttpError::InvalidUrl(_))
        ));
    }
}
