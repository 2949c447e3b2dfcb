//! Catalogue sources and paginated browsing.
//!
//! - [`CatalogueSource`] - what a source can list: popular, latest, search
//! - [`http`] - a JSON-over-HTTP source with retry and size limits
//! - [`paging`] - the page-cursor engine shared by every listing
//! - [`session`] - drives one engine through consecutive pages
//!
//! # Example
//!
//! ```ignore
//! use shelf::source::{Listing, PagingSession, SourcePager};
//!
//! let pager = SourcePager::new(source, Listing::Popular);
//! let mut session = PagingSession::new(pager);
//! while let Ok(Some(page)) = session.load_next().await {
//!     println!("{} entries", page.data.len());
//! }
//! ```

pub mod http;
mod paging;
mod session;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::storage::Entry;

pub use http::{HttpSource, HttpSourceOptions};
pub use paging::{LoadResult, Listing, Page, PageError, PagingState, SourcePager};
pub use session::PagingSession;

/// Errors raised by a source while fetching one page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body could not be decoded as a listing
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The listing endpoint could not be built from the source's base URL
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// Any other failure reported by a source implementation
    #[error("{0}")]
    Other(String),
}

/// One entry as a source lists it, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SourceEntry {
    /// Build an unsaved [`Entry`] owned by `source_id`.
    pub fn to_entry(&self, source_id: i64) -> Entry {
        Entry {
            id: 0,
            source_id,
            url: self.url.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            favorite: false,
            cover_last_modified: 0,
            date_added: 0,
        }
    }
}

/// A fetched batch of entries plus whether the source has more pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntriesPage {
    #[serde(default)]
    pub entries: Vec<SourceEntry>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// One search filter state, sent to the source as a query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub value: String,
}

impl std::str::FromStr for Filter {
    type Err = String;

    /// Parse `name=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("filter name is empty in '{s}'"));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Ordered set of filter states for a search listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterList(Vec<Filter>);

impl FilterList {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self(filters)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.0.iter()
    }
}

impl FromIterator<Filter> for FilterList {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A content source that exposes paginated catalogue listings.
///
/// Page numbers are 1-based. Implementations must tolerate the same page
/// being requested more than once.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// Stable id used as the second half of an entry's identity.
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    async fn fetch_popular(&self, page: u32) -> Result<EntriesPage, FetchError>;

    async fn fetch_latest(&self, page: u32) -> Result<EntriesPage, FetchError>;

    async fn fetch_search(
        &self,
        page: u32,
        query: &str,
        filters: &FilterList,
    ) -> Result<EntriesPage, FetchError>;
}

/// Version component of the source id hash. Bump to re-key every source.
const SOURCE_ID_VERSION: u32 = 1;

/// Derive a stable source id from its name and language.
///
/// First 8 bytes of SHA-256 over `"{lowercase name}/{lang}/{version}"`,
/// with the sign bit cleared so ids are always non-negative.
pub fn source_id(name: &str, lang: &str) -> i64 {
    let key = format!("{}/{}/{}", name.to_lowercase(), lang, SOURCE_ID_VERSION);
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & (i64::MAX as u64)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_is_stable_and_non_negative() {
        let a = source_id("Example", "en");
        let b = source_id("example", "en");
        assert_eq!(a, b);
        assert!(a >= 0);
        assert_ne!(a, source_id("Example", "fr"));
    }

    #[test]
    fn test_filter_parse() {
        let filter: Filter = "genre = action".parse().unwrap();
        assert_eq!(filter.name, "genre");
        assert_eq!(filter.value, "action");

        assert!("no-equals".parse::<Filter>().is_err());
        assert!("=value".parse::<Filter>().is_err());
    }

    #[test]
    fn test_entries_page_deserialize_defaults() {
        let page: EntriesPage = serde_json::from_str(
            r#"{"entries":[{"url":"/a","title":"A","thumbnail_url":"https://img/a.jpg"}]}"#,
        )
        .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(!page.has_next_page);
        assert_eq!(page.entries[0].author, None);
    }

    #[test]
    fn test_source_entry_to_entry_is_unsaved() {
        let entry = SourceEntry {
            url: "/a".to_string(),
            title: "A".to_string(),
            thumbnail_url: None,
            author: None,
            description: None,
        }
        .to_entry(9);
        assert_eq!(entry.id, 0);
        assert_eq!(entry.source_id, 9);
        assert!(!entry.favorite);
    }
}
