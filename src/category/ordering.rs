use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{CategoryError, CategoryStore};
use crate::storage::{Category, CategoryUpdate, NewCategory};
use crate::util::clean_label;

/// Keeps user categories uniquely named and densely ordered.
///
/// Every structural operation runs under one write lock, so a delete and a
/// reorder can never interleave their read and write halves. Multi-row
/// changes go to the store as one atomic batch.
///
/// The lock lives in the engine, not the store: build one engine per store
/// and share it through an `Arc`. Two engines over the same store do not
/// serialize against each other.
pub struct CategoryOrdering<S> {
    store: Arc<S>,
    write_lock: Mutex<()>,
}

impl<S: CategoryStore> CategoryOrdering<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Live category snapshots straight from the store.
    pub fn subscribe(&self) -> BoxStream<'static, Vec<Category>> {
        self.store.subscribe_all()
    }

    /// Current user categories sorted by `order`.
    pub async fn user_categories(&self) -> Result<Vec<Category>, CategoryError> {
        let mut categories: Vec<Category> = self
            .store
            .list_all()
            .await
            .map_err(internal)?
            .into_iter()
            .filter(|c| !c.is_system())
            .collect();
        categories.sort_by_key(|c| (c.order, c.id));
        Ok(categories)
    }

    /// Create a category at the end of the order, returning its ID.
    pub async fn create(&self, name: &str) -> Result<i64, CategoryError> {
        let name = sanitize_name(name)?;
        let _writer = self.write_lock.lock().await;

        let categories = self.user_categories().await?;
        if categories.iter().any(|c| same_name(&c.name, &name)) {
            return Err(CategoryError::NameConflict(name));
        }

        let order = categories.len() as i64;
        let id = self
            .store
            .insert(&NewCategory {
                name: name.clone(),
                order,
            })
            .await
            .map_err(internal)?;

        tracing::info!(category_id = id, name = %name, order, "Category created");
        Ok(id)
    }

    /// Rename a category in place.
    ///
    /// Renaming to a different casing of its own name is allowed.
    pub async fn rename(&self, category: &Category, new_name: &str) -> Result<(), CategoryError> {
        let name = sanitize_name(new_name)?;
        let _writer = self.write_lock.lock().await;

        let categories = self.user_categories().await?;
        if !categories.iter().any(|c| c.id == category.id) {
            tracing::warn!(category_id = category.id, "Rename ignored: not a user category");
            return Ok(());
        }
        if categories
            .iter()
            .any(|c| c.id != category.id && same_name(&c.name, &name))
        {
            return Err(CategoryError::NameConflict(name));
        }

        self.store
            .update(&[CategoryUpdate {
                id: category.id,
                name: Some(name.clone()),
                order: None,
            }])
            .await
            .map_err(internal)?;

        tracing::info!(category_id = category.id, name = %name, "Category renamed");
        Ok(())
    }

    /// Delete a category and close the gap it leaves in the order.
    pub async fn delete(&self, category_id: i64) -> Result<(), CategoryError> {
        let _writer = self.write_lock.lock().await;

        let categories = self.user_categories().await?;
        if !categories.iter().any(|c| c.id == category_id) {
            tracing::warn!(category_id, "Delete ignored: not a user category");
            return Ok(());
        }

        let reorder = dense_reorder(categories.iter().filter(|c| c.id != category_id));
        self.store
            .delete_and_reorder(category_id, &reorder)
            .await
            .map_err(internal)?;

        tracing::info!(category_id, renumbered = reorder.len(), "Category deleted");
        Ok(())
    }

    /// Swap with the previous category. No-op when already first.
    pub async fn move_up(&self, category: &Category) -> Result<(), CategoryError> {
        self.move_by(category, Direction::Up).await
    }

    /// Swap with the next category. No-op when already last.
    pub async fn move_down(&self, category: &Category) -> Result<(), CategoryError> {
        self.move_by(category, Direction::Down).await
    }

    async fn move_by(&self, category: &Category, direction: Direction) -> Result<(), CategoryError> {
        let _writer = self.write_lock.lock().await;

        // Positions come from the store, not the caller's possibly stale copy
        let categories = self.user_categories().await?;
        let Some(index) = categories.iter().position(|c| c.id == category.id) else {
            tracing::warn!(category_id = category.id, "Move ignored: not a user category");
            return Ok(());
        };

        let neighbour = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|&i| i < categories.len()),
        };
        let Some(neighbour) = neighbour else {
            return Ok(());
        };

        let current = &categories[index];
        let other = &categories[neighbour];
        self.store
            .update(&[
                CategoryUpdate {
                    id: current.id,
                    name: None,
                    order: Some(other.order),
                },
                CategoryUpdate {
                    id: other.id,
                    name: None,
                    order: Some(current.order),
                },
            ])
            .await
            .map_err(internal)?;

        tracing::debug!(category_id = current.id, swapped_with = other.id, "Category moved");
        Ok(())
    }
}

enum Direction {
    Up,
    Down,
}

/// Updates that renumber `remaining` to 0..n, skipping rows already in place.
fn dense_reorder<'a>(remaining: impl Iterator<Item = &'a Category>) -> Vec<CategoryUpdate> {
    remaining
        .enumerate()
        .filter(|(index, c)| c.order != *index as i64)
        .map(|(index, c)| CategoryUpdate {
            id: c.id,
            name: None,
            order: Some(index as i64),
        })
        .collect()
}

fn sanitize_name(name: &str) -> Result<String, CategoryError> {
    clean_label(name).ok_or(CategoryError::InvalidName)
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn internal(err: anyhow::Error) -> CategoryError {
    tracing::warn!(error = %err, "Category store operation failed");
    CategoryError::Internal(err.to_string())
}
