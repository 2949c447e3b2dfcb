use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of shelf appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if is_lock_message(&error_string) || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

pub(crate) fn is_lock_message(lowercase: &str) -> bool {
    lowercase.contains("database is locked")
        || lowercase.contains("database table is locked")
        || lowercase.contains("sqlite_busy")
        || lowercase.contains("sqlite_locked")
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for category queries: (id, name, sort_order, system)
pub(crate) type CategoryRow = (i64, String, i64, bool);

/// Internal row type for Entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub favorite: bool,
    pub cover_last_modified: i64,
    pub date_added: i64,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            id: self.id,
            source_id: self.source_id,
            url: self.url,
            title: self.title,
            author: self.author,
            description: self.description,
            thumbnail_url: self.thumbnail_url,
            favorite: self.favorite,
            cover_last_modified: self.cover_last_modified,
            date_added: self.date_added,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A locally tracked catalogue entry.
///
/// Identity is the `(url, source_id)` pair; `id` is assigned by the store on
/// first insert. Entries built from a remote listing carry `id == 0` until
/// they have been reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub favorite: bool,
    /// Bumped whenever the cover image changes, used as a cache-busting marker.
    pub cover_last_modified: i64,
    pub date_added: i64,
}

impl Entry {
    /// Cover reference for image caches.
    pub fn cover(&self) -> EntryCover {
        EntryCover {
            entry_id: self.id,
            source_id: self.source_id,
            is_entry_favorite: self.favorite,
            url: self.thumbnail_url.clone(),
            last_modified: self.cover_last_modified,
        }
    }
}

/// Everything an image cache needs to key and invalidate a cover.
///
/// The favorite flag is mirrored here because favorited covers are kept in a
/// persistent cache while the rest are evictable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryCover {
    pub entry_id: i64,
    pub source_id: i64,
    pub is_entry_favorite: bool,
    pub url: Option<String>,
    pub last_modified: i64,
}

/// A user-defined group of entries.
///
/// `order` is dense and zero-based across non-system categories. System
/// categories (the built-in "Default") sit outside that sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub order: i64,
    pub system: bool,
}

impl Category {
    /// Id of the built-in "Default" category seeded by the migration.
    pub const DEFAULT_ID: i64 = 0;

    pub fn is_system(&self) -> bool {
        self.system
    }
}

impl From<CategoryRow> for Category {
    fn from((id, name, order, system): CategoryRow) -> Self {
        Self {
            id,
            name,
            order,
            system,
        }
    }
}

/// A category about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
    pub order: i64,
}

/// Partial update of one category row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryUpdate {
    pub id: i64,
    pub name: Option<String>,
    pub order: Option<i64>,
}
