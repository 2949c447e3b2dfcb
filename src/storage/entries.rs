use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;
use super::types::{Entry, EntryDbRow};
use crate::library::EntryStore;

const ENTRY_COLUMNS: &str = "id, source_id, url, title, author, description, thumbnail_url, \
                             favorite, cover_last_modified, date_added";

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Look up an entry by its source-assigned identity.
    pub async fn find_entry_by_identity(&self, url: &str, source_id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE url = ? AND source_id = ?"
        ))
        .bind(url)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntryDbRow::into_entry))
    }

    /// Get an entry by internal id.
    pub async fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntryDbRow::into_entry))
    }

    /// Insert an entry, returning its new id.
    ///
    /// Returns `None` when an entry with the same `(url, source_id)` already
    /// exists; the existing row is left untouched. `entry.id` is ignored.
    pub async fn insert_entry(&self, entry: &Entry) -> Result<Option<i64>> {
        let date_added = if entry.date_added > 0 {
            entry.date_added
        } else {
            chrono::Utc::now().timestamp()
        };

        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO entries
                (source_id, url, title, author, description, thumbnail_url,
                 favorite, cover_last_modified, date_added)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url, source_id) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(entry.source_id)
        .bind(&entry.url)
        .bind(&entry.title)
        .bind(&entry.author)
        .bind(&entry.description)
        .bind(&entry.thumbnail_url)
        .bind(entry.favorite)
        .bind(entry.cover_last_modified)
        .bind(date_added)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Set the favorite flag of an entry (user action).
    ///
    /// The stored title is replaced with `title` when given, so the display
    /// title the user saw at the moment of favoriting is the one kept.
    pub async fn set_entry_favorite(
        &self,
        entry_id: i64,
        favorite: bool,
        title: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE entries SET favorite = ?, title = COALESCE(?, title) WHERE id = ?")
            .bind(favorite)
            .bind(title)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All favorited entries, alphabetically.
    pub async fn get_favorite_entries(&self) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryDbRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE favorite = 1 ORDER BY title COLLATE NOCASE"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntryDbRow::into_entry).collect())
    }

    #[cfg(test)]
    pub(crate) async fn count_entries_for_identity(&self, url: &str, source_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entries WHERE url = ? AND source_id = ?")
                .bind(url)
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl EntryStore for Database {
    async fn find_by_identity(&self, url: &str, source_id: i64) -> Result<Option<Entry>> {
        self.find_entry_by_identity(url, source_id).await
    }

    async fn insert(&self, entry: &Entry) -> Result<Option<i64>> {
        self.insert_entry(entry).await
    }
}
