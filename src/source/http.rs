use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use super::{source_id, CatalogueSource, EntriesPage, FetchError, FilterList};
use crate::util::clean_label;

/// Request tuning for [`HttpSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceOptions {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after a 429, a 5xx or a truncated body
    pub max_retries: u32,
    /// Responses larger than this are rejected
    pub max_response_bytes: usize,
    /// First backoff delay; doubles on every retry
    pub backoff_base: Duration,
}

impl Default for HttpSourceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            max_response_bytes: 10 * 1024 * 1024, // 10MB
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// A catalogue served as JSON over HTTP.
///
/// Listings live under the base URL:
///
/// - `GET {base}/popular?page=N`
/// - `GET {base}/latest?page=N`
/// - `GET {base}/search?page=N&q=QUERY&{filter}={value}...`
///
/// Each answers with `{"entries": [...], "has_next_page": bool}`.
pub struct HttpSource {
    id: i64,
    name: String,
    base_url: Url,
    api_key: Option<SecretString>,
    client: reqwest::Client,
    options: HttpSourceOptions,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpSource {
    pub fn new(name: &str, lang: &str, base_url: Url, client: reqwest::Client) -> Self {
        // Url::join replaces the last path segment unless the base ends in '/'
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            id: source_id(name, lang),
            name: name.to_string(),
            base_url,
            api_key: None,
            client,
            options: HttpSourceOptions::default(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_options(mut self, options: HttpSourceOptions) -> Self {
        self.options = options;
        self
    }

    fn endpoint(&self, listing: &str, page: u32) -> Result<Url, FetchError> {
        let mut url = self.base_url.join(listing)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn get_page(&self, url: Url) -> Result<EntriesPage, FetchError> {
        let bytes = self.get_bytes(&url).await?;

        let mut page: EntriesPage =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        for entry in &mut page.entries {
            entry.title = clean_label(&entry.title).unwrap_or_default();
        }

        // Entries without identity or title cannot be reconciled
        let before = page.entries.len();
        page.entries
            .retain(|e| !e.url.trim().is_empty() && !e.title.is_empty());
        let skipped = before - page.entries.len();
        if skipped > 0 {
            tracing::warn!(
                source = %self.name,
                url = %url,
                skipped = skipped,
                "Entries without url or title skipped"
            );
        }

        Ok(page)
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key.expose_secret());
            }

            let response = tokio::time::timeout(self.options.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.options.max_retries {
                    return Err(FetchError::RateLimited(self.options.max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    source = %self.name,
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= self.options.max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    source = %self.name,
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.options.max_response_bytes).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < self.options.max_retries =>
                {
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        source = %self.name,
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.options.backoff_base.saturating_mul(2u32.saturating_pow(retry_count))
    }
}

#[async_trait]
impl CatalogueSource for HttpSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_popular(&self, page: u32) -> Result<EntriesPage, FetchError> {
        self.get_page(self.endpoint("popular", page)?).await
    }

    async fn fetch_latest(&self, page: u32) -> Result<EntriesPage, FetchError> {
        self.get_page(self.endpoint("latest", page)?).await
    }

    async fn fetch_search(
        &self,
        page: u32,
        query: &str,
        filters: &FilterList,
    ) -> Result<EntriesPage, FetchError> {
        let mut url = self.endpoint("search", page)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            for filter in filters.iter() {
                pairs.append_pair(&filter.name, &filter.value);
            }
        }
        self.get_page(url).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
