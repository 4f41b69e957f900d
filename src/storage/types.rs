use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another gator process. Please close it and try again.")]
    InstanceLocked,

    /// A uniqueness constraint rejected the write (user name, feed URL, follow pair)
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A referenced row does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, detecting SQLite lock conditions.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    /// Map a unique-constraint violation to `AlreadyExists(what)`, anything else to `from_sqlx`.
    pub(crate) fn on_unique(what: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let what = what.into();
        move |err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::AlreadyExists(what)
            }
            _ => DatabaseError::from_sqlx(err),
        }
    }
}

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Timestamps are stored as Unix milliseconds so selection order survives
/// several fetches within the same second.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: self.name,
            url: self.url,
            user_id: self.user_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            last_fetched_at: self.last_fetched_at.map(from_millis),
        }
    }
}

/// Feed joined with its owner's name (`gator feeds`)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedListingRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_name: Option<String>,
    pub last_fetched_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedFollowRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub user_name: String,
    pub feed_name: String,
    pub feed_url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FeedFollowRow {
    pub(crate) fn into_follow(self) -> FeedFollow {
        FeedFollow {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            user_name: self.user_name,
            feed_name: self.feed_name,
            feed_url: self.feed_url,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

impl PostRow {
    pub(crate) fn into_post(self) -> Post {
        Post {
            id: self.id,
            feed_id: self.feed_id,
            feed_name: self.feed_name,
            title: self.title,
            description: self.description,
            url: self.url,
            published_at: self.published_at.map(from_millis),
            created_at: from_millis(self.created_at),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A subscribed feed.
///
/// `user_id` is the user who registered it; it becomes `None` when that user
/// is removed, the feed itself stays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// Feed row for listings, with the owner's name resolved.
#[derive(Debug, Clone)]
pub struct FeedListing {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl From<FeedListingRow> for FeedListing {
    fn from(row: FeedListingRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            url: row.url,
            owner: row.user_name,
            last_fetched_at: row.last_fetched_at.map(from_millis),
        }
    }
}

/// Link between a user and a feed, with both names resolved for display.
#[derive(Debug, Clone)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub user_name: String,
    pub feed_name: String,
    pub feed_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored post. Never mutated after insertion.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub title: String,
    /// Plain text, markup already stripped
    pub description: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A post ready for insertion.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: i64,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of `insert_post_if_absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A post with the same URL is already stored
    AlreadyExists,
}
