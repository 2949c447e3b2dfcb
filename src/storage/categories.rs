use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::{Sqlite, Transaction};

use super::schema::Database;
use super::types::{Category, CategoryRow, CategoryUpdate, NewCategory};
use crate::category::CategoryStore;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Get all categories, system categories included, in display order.
    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            "SELECT id, name, sort_order, system FROM categories ORDER BY sort_order, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Category::from).collect())
    }

    /// Insert a category, returning its ID.
    ///
    /// Name validation and order assignment belong to the ordering engine;
    /// this writes the row as given.
    pub async fn insert_category(&self, category: &NewCategory) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO categories (name, sort_order, system) VALUES (?, ?, 0) RETURNING id",
        )
        .bind(&category.name)
        .bind(category.order)
        .fetch_one(&self.pool)
        .await?;

        self.notify_categories_changed();
        Ok(row.0)
    }

    /// Apply a batch of partial updates in one transaction.
    pub async fn update_categories(&self, updates: &[CategoryUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        apply_updates(&mut tx, updates).await?;
        tx.commit().await?;

        self.notify_categories_changed();
        Ok(())
    }

    /// Delete a category and apply the accompanying renumbering atomically.
    ///
    /// Entry memberships of the category are removed with it. System
    /// categories are never deleted.
    pub async fn delete_category_and_reorder(
        &self,
        id: i64,
        reorder: &[CategoryUpdate],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM categories WHERE id = ? AND system = 0")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted > 0 {
            sqlx::query("DELETE FROM entry_categories WHERE category_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        apply_updates(&mut tx, reorder).await?;

        tx.commit().await?;

        self.notify_categories_changed();
        Ok(())
    }

    /// Live stream of the full category set.
    ///
    /// Yields the current set immediately, then again after every committed
    /// write. Writes that land while a snapshot is being read collapse into
    /// a single follow-up snapshot.
    pub fn subscribe_categories(&self) -> BoxStream<'static, Vec<Category>> {
        let mut rx = self.category_changes.subscribe();
        rx.mark_changed();

        stream::unfold((self.clone(), rx), |(db, mut rx)| async move {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }

                match db.get_categories().await {
                    Ok(categories) => return Some((categories, (db, rx))),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to load categories for subscriber");
                    }
                }
            }
        })
        .boxed()
    }

    // ========================================================================
    // Entry Membership Operations
    // ========================================================================

    /// Replace the set of categories an entry belongs to.
    pub async fn set_entry_categories(&self, entry_id: i64, category_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entry_categories WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        for category_id in category_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO entry_categories (entry_id, category_id) VALUES (?, ?)",
            )
            .bind(entry_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Categories an entry belongs to, in display order.
    pub async fn get_categories_for_entry(&self, entry_id: i64) -> Result<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.name, c.sort_order, c.system
            FROM categories c
            JOIN entry_categories ec ON ec.category_id = c.id
            WHERE ec.entry_id = ?
            ORDER BY c.sort_order, c.id
        "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Category::from).collect())
    }
}

async fn apply_updates(tx: &mut Transaction<'_, Sqlite>, updates: &[CategoryUpdate]) -> Result<()> {
    for update in updates {
        sqlx::query(
            r#"
            UPDATE categories
            SET name = COALESCE(?, name),
                sort_order = COALESCE(?, sort_order)
            WHERE id = ?
        "#,
        )
        .bind(update.name.as_deref())
        .bind(update.order)
        .bind(update.id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl CategoryStore for Database {
    async fn list_all(&self) -> Result<Vec<Category>> {
        self.get_categories().await
    }

    fn subscribe_all(&self) -> BoxStream<'static, Vec<Category>> {
        self.subscribe_categories()
    }

    async fn insert(&self, category: &NewCategory) -> Result<i64> {
        self.insert_category(category).await
    }

    async fn update(&self, updates: &[CategoryUpdate]) -> Result<()> {
        self.update_categories(updates).await
    }

    async fn delete_and_reorder(&self, id: i64, reorder: &[CategoryUpdate]) -> Result<()> {
        self.delete_category_and_reorder(id, reorder).await
    }
}
