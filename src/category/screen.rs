use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{CategoryError, CategoryOrdering, CategoryStore};
use crate::storage::Category;

const EVENT_CAPACITY: usize = 16;

/// Dialog currently shown on top of the category list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryDialog {
    Create,
    Rename(Category),
    Delete(Category),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryScreenState {
    /// No snapshot received yet.
    Loading,
    Success {
        /// User categories only, in display order.
        categories: Vec<Category>,
        dialog: Option<CategoryDialog>,
    },
}

impl CategoryScreenState {
    pub fn categories(&self) -> &[Category] {
        match self {
            Self::Loading => &[],
            Self::Success { categories, .. } => categories,
        }
    }

    pub fn dialog(&self) -> Option<&CategoryDialog> {
        match self {
            Self::Loading => None,
            Self::Success { dialog, .. } => dialog.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories().is_empty()
    }
}

/// One-shot notification of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryEvent {
    CategoryNameConflict,
    InvalidName,
    InternalError,
}

impl From<&CategoryError> for CategoryEvent {
    fn from(err: &CategoryError) -> Self {
        match err {
            CategoryError::NameConflict(_) => Self::CategoryNameConflict,
            CategoryError::InvalidName => Self::InvalidName,
            CategoryError::Internal(_) => Self::InternalError,
        }
    }
}

/// Controller for the category management screen.
///
/// State follows the store's live category snapshots. Commands go through
/// [`CategoryOrdering`]; their outcome shows up in the next snapshot, and a
/// failure additionally emits exactly one [`CategoryEvent`].
///
/// Dropping the screen stops the snapshot subscription.
pub struct CategoryScreen<S> {
    engine: Arc<CategoryOrdering<S>>,
    state: Arc<watch::Sender<CategoryScreenState>>,
    events: mpsc::Sender<CategoryEvent>,
    cancel: CancellationToken,
}

impl<S: CategoryStore + 'static> CategoryScreen<S> {
    /// Start the screen. Must be called inside a Tokio runtime.
    ///
    /// Returns the controller and the receiving half of its event channel.
    pub fn new(engine: Arc<CategoryOrdering<S>>) -> (Self, mpsc::Receiver<CategoryEvent>) {
        let (state, _) = watch::channel(CategoryScreenState::Loading);
        let state = Arc::new(state);
        let (events, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(follow_snapshots(
            engine.subscribe(),
            state.clone(),
            cancel.clone(),
        ));

        let screen = Self {
            engine,
            state,
            events,
            cancel,
        };
        (screen, events_rx)
    }
}

impl<S: CategoryStore> CategoryScreen<S> {
    /// Receiver that observes every state change.
    pub fn state(&self) -> watch::Receiver<CategoryScreenState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> CategoryScreenState {
        self.state.borrow().clone()
    }

    pub async fn create_category(&self, name: &str) {
        let result = self.engine.create(name).await.map(|_| ());
        self.report(result);
    }

    pub async fn rename_category(&self, category: &Category, name: &str) {
        let result = self.engine.rename(category, name).await;
        self.report(result);
    }

    pub async fn delete_category(&self, category_id: i64) {
        let result = self.engine.delete(category_id).await;
        self.report(result);
    }

    pub async fn move_up(&self, category: &Category) {
        let result = self.engine.move_up(category).await;
        self.report(result);
    }

    pub async fn move_down(&self, category: &Category) {
        let result = self.engine.move_down(category).await;
        self.report(result);
    }

    /// Show `dialog`. Ignored while loading.
    pub fn show_dialog(&self, dialog: CategoryDialog) {
        self.set_dialog(Some(dialog));
    }

    pub fn dismiss_dialog(&self) {
        self.set_dialog(None);
    }

    fn set_dialog(&self, dialog: Option<CategoryDialog>) {
        self.state.send_if_modified(|state| match state {
            CategoryScreenState::Loading => false,
            CategoryScreenState::Success { dialog: current, .. } => {
                *current = dialog;
                true
            }
        });
    }

    fn report(&self, result: Result<(), CategoryError>) {
        let Err(err) = result else {
            return;
        };

        tracing::debug!(error = %err, "Category command failed");
        if let Err(e) = self.events.try_send(CategoryEvent::from(&err)) {
            tracing::warn!(error = %e, "Category event dropped");
        }
    }
}

impl<S> Drop for CategoryScreen<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn follow_snapshots(
    mut snapshots: futures::stream::BoxStream<'static, Vec<Category>>,
    state: Arc<watch::Sender<CategoryScreenState>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = snapshots.next() => next,
        };
        let Some(mut latest) = next else {
            break;
        };

        // Skip straight to the newest snapshot already queued
        while let Some(Some(newer)) = snapshots.next().now_or_never() {
            latest = newer;
        }

        apply_snapshot(&state, latest);
    }
    tracing::debug!("Category subscription ended");
}

fn apply_snapshot(state: &watch::Sender<CategoryScreenState>, snapshot: Vec<Category>) {
    let visible: Vec<Category> = snapshot.into_iter().filter(|c| !c.is_system()).collect();

    state.send_modify(|current| {
        let dialog = match current {
            CategoryScreenState::Loading => None,
            CategoryScreenState::Success { dialog, .. } => dialog.take(),
        };
        *current = CategoryScreenState::Success {
            categories: visible,
            dialog,
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CategoryUpdate, Database, NewCategory};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn screen() -> (CategoryScreen<Database>, mpsc::Receiver<CategoryEvent>) {
        let db = Arc::new(Database::open(":memory:").await.unwrap());
        CategoryScreen::new(Arc::new(CategoryOrdering::new(db)))
    }

    async fn wait_for(
        screen: &CategoryScreen<impl CategoryStore>,
        predicate: impl FnMut(&CategoryScreenState) -> bool,
    ) -> CategoryScreenState {
        let mut rx = screen.state();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for state")
            .unwrap()
            .clone();
        state
    }

    fn names(state: &CategoryScreenState) -> Vec<&str> {
        state.categories().iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_initial_snapshot_hides_system_category() {
        let (screen, _events) = screen().await;

        let state = wait_for(&screen, |s| matches!(s, CategoryScreenState::Success { .. })).await;
        assert!(state.is_empty());
        assert_eq!(state.dialog(), None);
    }

    #[tokio::test]
    async fn test_create_updates_state_without_event() {
        let (screen, mut events) = screen().await;

        screen.create_category("Reading").await;

        let state = wait_for(&screen, |s| s.categories().len() == 1).await;
        assert_eq!(names(&state), vec!["Reading"]);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_duplicate_emits_single_conflict_event() {
        let (screen, mut events) = screen().await;
        screen.create_category("Action").await;
        screen.create_category("Action").await;

        assert_eq!(events.recv().await, Some(CategoryEvent::CategoryNameConflict));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

        let state = wait_for(&screen, |s| s.categories().len() == 1).await;
        assert_eq!(names(&state), vec!["Action"]);
    }

    #[tokio::test]
    async fn test_blank_name_emits_invalid_name() {
        let (screen, mut events) = screen().await;
        screen.create_category("   ").await;

        assert_eq!(events.recv().await, Some(CategoryEvent::InvalidName));
    }

    #[tokio::test]
    async fn test_dialog_survives_snapshots() {
        let (screen, _events) = screen().await;
        wait_for(&screen, |s| matches!(s, CategoryScreenState::Success { .. })).await;

        screen.show_dialog(CategoryDialog::Create);
        screen.create_category("Completed").await;

        let state = wait_for(&screen, |s| s.categories().len() == 1).await;
        assert_eq!(state.dialog(), Some(&CategoryDialog::Create));

        screen.dismiss_dialog();
        assert_eq!(screen.current_state().dialog(), None);
    }

    #[tokio::test]
    async fn test_reorder_and_delete_through_screen() {
        let (screen, mut events) = screen().await;
        screen.create_category("Reading").await;
        screen.create_category("Plan to Read").await;

        let state = wait_for(&screen, |s| s.categories().len() == 2).await;
        let plan = state.categories()[1].clone();

        screen.move_up(&plan).await;
        let state = wait_for(&screen, |s| {
            s.categories().first().is_some_and(|c| c.id == plan.id)
        })
        .await;
        assert_eq!(names(&state), vec!["Plan to Read", "Reading"]);

        screen.delete_category(plan.id).await;
        let state = wait_for(&screen, |s| s.categories().len() == 1).await;
        assert_eq!(names(&state), vec!["Reading"]);
        assert_eq!(state.categories()[0].order, 0);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    /// Store whose subscription never yields.
    struct SilentStore;

    #[async_trait]
    impl CategoryStore for SilentStore {
        async fn list_all(&self) -> anyhow::Result<Vec<Category>> {
            Err(anyhow::anyhow!("unavailable"))
        }

        fn subscribe_all(&self) -> BoxStream<'static, Vec<Category>> {
            Box::pin(futures::stream::pending())
        }

        async fn insert(&self, _category: &NewCategory) -> anyhow::Result<i64> {
            Err(anyhow::anyhow!("unavailable"))
        }

        async fn update(&self, _updates: &[CategoryUpdate]) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("unavailable"))
        }

        async fn delete_and_reorder(
            &self,
            _id: i64,
            _reorder: &[CategoryUpdate],
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("unavailable"))
        }
    }

    #[tokio::test]
    async fn test_dialog_ignored_while_loading() {
        let (screen, _events) =
            CategoryScreen::new(Arc::new(CategoryOrdering::new(Arc::new(SilentStore))));

        screen.show_dialog(CategoryDialog::Create);
        assert_eq!(screen.current_state(), CategoryScreenState::Loading);
    }

    #[tokio::test]
    async fn test_store_failure_emits_internal_error() {
        let (screen, mut events) =
            CategoryScreen::new(Arc::new(CategoryOrdering::new(Arc::new(SilentStore))));

        screen.create_category("Anything").await;
        assert_eq!(events.recv().await, Some(CategoryEvent::InternalError));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_apply_snapshot_keeps_dialog() {
        let (state, _rx) = watch::channel(CategoryScreenState::Loading);
        let category = Category {
            id: 3,
            name: "Manga".to_string(),
            order: 0,
            system: false,
        };

        apply_snapshot(&state, vec![]);
        state.send_modify(|s| {
            if let CategoryScreenState::Success { dialog, .. } = s {
                *dialog = Some(CategoryDialog::Rename(category.clone()));
            }
        });
        apply_snapshot(&state, vec![category.clone()]);

        assert_eq!(
            *state.borrow(),
            CategoryScreenState::Success {
                categories: vec![category.clone()],
                dialog: Some(CategoryDialog::Rename(category)),
            }
        );
    }

    #[tokio::test]
    async fn test_queued_snapshots_collapse_to_latest() {
        use std::sync::Mutex;

        let (state, mut rx) = watch::channel(CategoryScreenState::Loading);
        let state = Arc::new(state);
        let snapshot = |labels: &[&str]| -> Vec<Category> {
            labels
                .iter()
                .enumerate()
                .map(|(i, name)| Category {
                    id: i as i64 + 1,
                    name: name.to_string(),
                    order: i as i64,
                    system: false,
                })
                .collect()
        };

        // State each snapshot finds when it is pulled off the stream
        let seen_on_pull = Arc::new(Mutex::new(Vec::new()));
        let observer = state.subscribe();
        let seen = seen_on_pull.clone();
        let snapshots = futures::stream::iter(vec![
            snapshot(&["A"]),
            snapshot(&["A", "B"]),
            snapshot(&["A", "B", "C"]),
        ])
        .inspect(move |_| seen.lock().unwrap().push(observer.borrow().clone()))
        .boxed();

        follow_snapshots(snapshots, state.clone(), CancellationToken::new()).await;

        assert_eq!(
            *seen_on_pull.lock().unwrap(),
            vec![CategoryScreenState::Loading; 3]
        );
        assert!(rx.has_changed().unwrap());
        assert_eq!(names(&rx.borrow_and_update()), vec!["A", "B", "C"]);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_drop_stops_subscription() {
        let (screen, _events) = screen().await;
        let token = screen.cancel.clone();

        drop(screen);
        assert!(token.is_cancelled());
    }
}
