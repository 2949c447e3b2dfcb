//! User categories: ordering engine and the management screen controller.
//!
//! - [`CategoryOrdering`] - create / rename / delete / reorder with unique
//!   names and a dense `order` sequence
//! - [`CategoryScreen`] - state machine that drives the engine from user
//!   commands and reports failures as [`CategoryEvent`]s

mod ordering;
mod screen;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::storage::{Category, CategoryUpdate, NewCategory};

pub use ordering::CategoryOrdering;
pub use screen::{CategoryDialog, CategoryEvent, CategoryScreen, CategoryScreenState};

/// Why a category command was rejected. State is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    /// Another user category already uses this name (case-insensitive).
    #[error("A category named '{0}' already exists")]
    NameConflict(String),

    /// Name is empty after stripping control characters and whitespace.
    #[error("Category name cannot be empty or whitespace-only")]
    InvalidName,

    /// The category store failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence the ordering engine needs.
///
/// Multi-row writes (`update`, `delete_and_reorder`) must be atomic: either
/// every row changes or none does.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Every category, system ones included.
    async fn list_all(&self) -> Result<Vec<Category>>;

    /// Full category set now, then again after each change.
    fn subscribe_all(&self) -> BoxStream<'static, Vec<Category>>;

    async fn insert(&self, category: &NewCategory) -> Result<i64>;

    async fn update(&self, updates: &[CategoryUpdate]) -> Result<()>;

    /// Delete one category and apply `reorder` in the same transaction.
    async fn delete_and_reorder(&self, id: i64, reorder: &[CategoryUpdate]) -> Result<()>;
}
