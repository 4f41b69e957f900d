use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use super::follows::insert_follow;
use super::schema::Database;
use super::types::{
    to_millis, DatabaseError, Feed, FeedListing, FeedListingRow, FeedRow, User,
};

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at";

/// Never-fetched feeds first, then oldest fetch, ties by id.
const FETCH_ORDER: &str = "ORDER BY last_fetched_at ASC NULLS FIRST, id ASC";

/// Insert a feed row on any executor (pool or transaction).
async fn insert_feed<'e, E>(
    executor: E,
    name: &str,
    url: &str,
    user_id: Option<i64>,
    now: i64,
) -> Result<FeedRow, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FeedRow>(&format!(
        "INSERT INTO feeds (name, url, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
    ))
    .bind(name)
    .bind(url)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(DatabaseError::on_unique(format!("feed '{url}'")))
}

/// Advance `last_fetched_at` without ever moving it backwards.
pub(crate) async fn stamp_fetched<'e, E>(
    executor: E,
    feed_id: i64,
    at: i64,
) -> Result<(), DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE feeds SET last_fetched_at = MAX(COALESCE(last_fetched_at, ?), ?), updated_at = ? \
         WHERE id = ?",
    )
    .bind(at)
    .bind(at)
    .bind(at)
    .bind(feed_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!("feed {feed_id}")));
    }
    Ok(())
}

impl Database {
    // ========================================================================
    // Feed Registry
    // ========================================================================

    /// Create a feed, optionally owned by a user. URLs are unique.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        owner: Option<&User>,
    ) -> Result<Feed, DatabaseError> {
        let now = to_millis(Utc::now());
        let row = insert_feed(&self.pool, name, url, owner.map(|u| u.id), now).await?;
        Ok(row.into_feed())
    }

    /// Register a feed on behalf of `owner` and make the owner follow it.
    ///
    /// Both rows are written in one transaction: either the feed exists and
    /// is followed by its creator, or nothing changed.
    pub async fn register_feed(
        &self,
        name: &str,
        url: &str,
        owner: &User,
    ) -> Result<Feed, DatabaseError> {
        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        let row = insert_feed(&mut *tx, name, url, Some(owner.id), now).await?;
        insert_follow(&mut *tx, owner.id, row.id, now)
            .await
            .map_err(DatabaseError::on_unique("feed follow"))?;

        tx.commit().await?;
        tracing::info!(feed_id = row.id, url = %row.url, user = %owner.name, "Registered feed");
        Ok(row.into_feed())
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// All feeds with their owner's name, ordered by name
    pub async fn list_feeds(&self) -> Result<Vec<FeedListing>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedListingRow>(
            r#"
            SELECT f.id, f.name, f.url, u.name AS user_name, f.last_fetched_at
            FROM feeds f
            LEFT JOIN users u ON u.id = f.user_id
            ORDER BY f.name, f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedListing::from).collect())
    }

    // ========================================================================
    // Scheduler Selection
    // ========================================================================

    /// The feed that has waited longest: never-fetched feeds first, then the
    /// oldest `last_fetched_at`. Returns `None` when no feeds are registered.
    pub async fn select_feed_for_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds {FETCH_ORDER} LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Select the next feed and stamp it fetched at `at` in one statement.
    ///
    /// Used when several workers poll concurrently: SQLite serializes the
    /// write, so two callers never claim the same feed for the same slot.
    /// The returned feed carries the new `last_fetched_at`.
    pub async fn claim_feed_for_fetch(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<Feed>, DatabaseError> {
        let at = to_millis(at);
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "UPDATE feeds SET last_fetched_at = MAX(COALESCE(last_fetched_at, ?), ?), updated_at = ? \
             WHERE id = (SELECT id FROM feeds {FETCH_ORDER} LIMIT 1) \
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(at)
        .bind(at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Record that `feed_id` was fetched at `at`.
    ///
    /// `last_fetched_at` never moves backwards: an older `at` leaves the
    /// stored value untouched.
    pub async fn mark_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        stamp_fetched(&self.pool, feed_id, to_millis(at)).await
    }
}
