//! reqwest-backed implementation of the `Fetch` primitive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::{debug, warn};

use super::{Fetch, FetchError};
use crate::models::{Request, Response};

/// HTTP request timeout in seconds.
/// Long enough for slow app-shell assets, short enough that an offline
/// fallback kicks in before the user gives up.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetcher backed by a shared reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidRequest(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn build_headers(request: &Request) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.append(name, value);
        }
        Ok(headers)
    }

    fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
        headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    warn!(header = %name, "Dropping non-ASCII response header");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("method {}: {}", request.method, e)))?;

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .headers(Self::build_headers(request)?);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = Self::collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status, bytes = body.len(), "Fetched");

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}
