use tokio_util::sync::CancellationToken;

use super::paging::{Page, PageError, PagingState, SourcePager};
use super::SourceEntry;

/// One forward pass over a listing.
///
/// Loads go through `&mut self`, so pages of a session arrive strictly in
/// order. A query or filter change should start a new session; `refresh`
/// restarts the same listing near the reader's position.
pub struct PagingSession {
    pager: SourcePager,
    pages: Vec<Page>,
    next_key: Option<u32>,
    exhausted: bool,
    cancel: CancellationToken,
}

impl PagingSession {
    pub fn new(pager: SourcePager) -> Self {
        Self {
            pager,
            pages: Vec::new(),
            next_key: None,
            exhausted: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by the in-flight load. Cancelling it makes that load
    /// return `PageError::Cancelled`; the session then arms a fresh token, so
    /// the next `load_next` retries the same page. Fetch the token again after
    /// a cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the last page was loaded or the source ran dry.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Every loaded entry, in listing order.
    pub fn entries(&self) -> impl Iterator<Item = &SourceEntry> {
        self.pages.iter().flat_map(|p| p.data.iter())
    }

    /// Load the next page.
    ///
    /// `Ok(None)` once the session is exhausted. A `Fetch` error leaves the
    /// cursor where it was, so calling again retries the same page.
    pub async fn load_next(&mut self) -> Result<Option<&Page>, PageError> {
        if self.exhausted {
            return Ok(None);
        }

        let loaded = self.pager.load(self.next_key, &self.cancel).await;
        match loaded {
            Ok(page) => {
                self.next_key = page.next_key;
                self.exhausted = page.next_key.is_none();
                self.pages.push(page);
                Ok(self.pages.last())
            }
            Err(PageError::Cancelled) => {
                self.cancel = CancellationToken::new();
                Err(PageError::Cancelled)
            }
            Err(e) => {
                if e.is_terminal() {
                    self.exhausted = true;
                }
                Err(e)
            }
        }
    }

    /// Snapshot of the loaded pages anchored at `anchor_position`.
    pub fn state(&self, anchor_position: Option<usize>) -> PagingState {
        PagingState {
            pages: self.pages.clone(),
            anchor_position,
        }
    }

    /// Drop loaded pages and restart near `anchor_position`.
    ///
    /// Any load still running against the old pages is cancelled.
    pub fn refresh(&mut self, anchor_position: Option<usize>) {
        let restart = SourcePager::refresh_key(&self.state(anchor_position));

        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.pages.clear();
        self.next_key = restart;
        self.exhausted = false;

        tracing::debug!(restart_key = ?restart, "Paging session refreshed");
    }
}
