use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{CatalogueSource, EntriesPage, FetchError, FilterList, SourceEntry};

/// Why a page load produced no page.
#[derive(Debug, Error)]
pub enum PageError {
    /// The source call failed. The same key can be retried.
    #[error("Failed to fetch page: {0}")]
    Fetch(#[from] FetchError),
    /// The source answered with zero entries. Terminal for the session.
    #[error("No more content")]
    NoMoreContent,
    /// The load was cancelled before the source answered.
    #[error("Load cancelled")]
    Cancelled,
}

impl PageError {
    /// True when loading further pages of this session is pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PageError::NoMoreContent)
    }
}

/// A loaded page and the keys around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page number this page was loaded with.
    pub key: u32,
    pub data: Vec<SourceEntry>,
    /// Always `None`: sources only page forward.
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

pub type LoadResult = Result<Page, PageError>;

/// Which listing of a source a pager walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Popular,
    Latest,
    Search { query: String, filters: FilterList },
}

/// Loaded pages plus the position the reader was last looking at.
#[derive(Debug, Clone, Default)]
pub struct PagingState {
    pub pages: Vec<Page>,
    /// Index into the concatenation of every page's entries.
    pub anchor_position: Option<usize>,
}

impl PagingState {
    /// The page holding `position`, or the last page when `position` is past
    /// the end. `None` only when nothing is loaded.
    pub fn closest_page_to_position(&self, position: usize) -> Option<&Page> {
        let mut seen = 0usize;
        for page in &self.pages {
            seen += page.data.len();
            if position < seen {
                return Some(page);
            }
        }
        self.pages.last()
    }
}

/// Turns one listing of a source into a cursor-driven page loader.
///
/// The cursor is the 1-based page number. Every listing shares the same
/// behaviour; only the source call differs.
#[derive(Clone)]
pub struct SourcePager {
    source: Arc<dyn CatalogueSource>,
    listing: Listing,
}

impl SourcePager {
    pub fn new(source: Arc<dyn CatalogueSource>, listing: Listing) -> Self {
        Self { source, listing }
    }

    async fn request_page(&self, page: u32) -> Result<EntriesPage, FetchError> {
        match &self.listing {
            Listing::Popular => self.source.fetch_popular(page).await,
            Listing::Latest => self.source.fetch_latest(page).await,
            Listing::Search { query, filters } => {
                self.source.fetch_search(page, query, filters).await
            }
        }
    }

    /// Load the page for `key` (`None` loads page 1).
    ///
    /// - fetch failure: `Err(PageError::Fetch)`, `key` stays valid for retry
    /// - empty page: `Err(PageError::NoMoreContent)`, never an empty `Page`
    /// - cancellation: `Err(PageError::Cancelled)`, the result must be dropped
    pub async fn load(&self, key: Option<u32>, cancel: &CancellationToken) -> LoadResult {
        let page = key.unwrap_or(1);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(source = %self.source.name(), page, "Page load cancelled");
                return Err(PageError::Cancelled);
            }
            result = self.request_page(page) => result,
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(source = %self.source.name(), page, error = %e, "Page fetch failed");
                return Err(PageError::Fetch(e));
            }
        };

        if fetched.entries.is_empty() {
            tracing::debug!(source = %self.source.name(), page, "Empty page, no more content");
            return Err(PageError::NoMoreContent);
        }

        Ok(Page {
            key: page,
            data: fetched.entries,
            prev_key: None,
            // The last representable page ends the listing
            next_key: fetched.has_next_page.then(|| page.checked_add(1)).flatten(),
        })
    }

    /// Key to restart loading from after an invalidation, so the reader
    /// resumes near the anchor instead of at page 1.
    pub fn refresh_key(state: &PagingState) -> Option<u32> {
        let anchor = state.anchor_position?;
        let page = state.closest_page_to_position(anchor)?;
        page.prev_key.or(page.next_key)
    }
}
