//! Network fetching for caching jobs.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL};
use reqwest::Method;
use std::time::Duration;

use super::traits::{FetchRequest, ResponseRecord};

/// Source of network responses.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  /// Fetch a request. Transport failures are errors; HTTP error statuses
  /// are returned as responses.
  async fn fetch(&self, request: &FetchRequest) -> Result<ResponseRecord>;
}

/// Fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<ResponseRecord> {
    let method = Method::from_bytes(request.method().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method(), e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.options.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
      let value =
        HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value: {}", e))?;
      headers.insert(name, value);
    }
    // Populating the cache must never be served from an intermediate cache
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let response = self
      .client
      .request(method, &request.url)
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(ResponseRecord {
      url: request.url.clone(),
      status,
      headers,
      body,
    })
  }
}
