use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    /// Version counter bumped after every committed category write.
    /// Subscribers re-read the full category set when it moves.
    pub(crate) category_changes: Arc<watch::Sender<u64>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another instance of shelf
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file owner-only before the pool touches it
        #[cfg(unix)]
        if path != ":memory:" {
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                if let Some(parent) = db_path.parent().filter(|p| p.exists()) {
                    use std::os::unix::fs::OpenOptionsExt;
                    let created = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path);
                    if let Err(e) = created {
                        // SQLite reports the real problem at connect time
                        tracing::debug!(parent = %parent.display(), error = %e, "Could not pre-create database file");
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives in one shared-cache connection group;
        // a single connection avoids SQLITE_LOCKED between pooled writers.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (category_changes, _) = watch::channel(0u64);
        let db = Self {
            pool,
            category_changes: Arc::new(category_changes),
        };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string().to_lowercase()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS` / `OR IGNORE`, so re-running on an
    /// existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // UNIQUE(url, source_id) backs the reconciler's one-entry-per-identity rule
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                source_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                description TEXT,
                thumbnail_url TEXT,
                favorite INTEGER NOT NULL DEFAULT 0,
                cover_last_modified INTEGER NOT NULL DEFAULT 0,
                date_added INTEGER NOT NULL,
                UNIQUE(url, source_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_favorite ON entries(favorite)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                system INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Built-in "Default" category. Sorts ahead of every user category.
        sqlx::query(
            "INSERT OR IGNORE INTO categories (id, name, sort_order, system) VALUES (0, 'Default', -1, 1)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entry_categories (
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (entry_id, category_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entry_categories_category ON entry_categories(category_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Wake category subscribers after a committed write.
    pub(crate) fn notify_categories_changed(&self) {
        self.category_changes
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_seeds_default_category() {
        let db = Database::open(":memory:").await.unwrap();

        let row: (i64, String, bool) =
            sqlx::query_as("SELECT id, name, system FROM categories WHERE id = 0")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(row, (0, "Default".to_string(), true));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join("shelf_db_test_open");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("library.db");
        std::fs::remove_file(&path).ok();

        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        drop(db);
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
