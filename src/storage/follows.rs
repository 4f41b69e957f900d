use chrono::Utc;
use sqlx::{Executor, Sqlite};

use super::schema::Database;
use super::types::{to_millis, DatabaseError, FeedFollow, FeedFollowRow, User, UserRow};

const FOLLOW_SELECT: &str = r#"
    SELECT ff.id, ff.user_id, ff.feed_id, u.name AS user_name, f.name AS feed_name,
           f.url AS feed_url, ff.created_at, ff.updated_at
    FROM feed_follows ff
    JOIN users u ON u.id = ff.user_id
    JOIN feeds f ON f.id = ff.feed_id
"#;

/// Insert a follow row on any executor, returning its id.
pub(crate) async fn insert_follow<'e, E>(
    executor: E,
    user_id: i64,
    feed_id: i64,
    now: i64,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(feed_id)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

impl Database {
    // ========================================================================
    // Feed Follow Operations
    // ========================================================================

    /// Make `user_id` follow the feed registered under `url`.
    ///
    /// # Errors
    ///
    /// - `DatabaseError::NotFound` if no feed has this URL
    /// - `DatabaseError::AlreadyExists` if the user already follows it
    pub async fn create_feed_follow(
        &self,
        user_id: i64,
        url: &str,
    ) -> Result<FeedFollow, DatabaseError> {
        let feed = self
            .get_feed_by_url(url)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("feed '{url}'")))?;

        let now = to_millis(Utc::now());
        let id = insert_follow(&self.pool, user_id, feed.id, now)
            .await
            .map_err(DatabaseError::on_unique(format!("follow of '{url}'")))?;

        let row = sqlx::query_as::<_, FeedFollowRow>(&format!("{FOLLOW_SELECT} WHERE ff.id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into_follow())
    }

    /// Feeds followed by a user, ordered by feed name
    pub async fn get_feed_follows_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<FeedFollow>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedFollowRow>(&format!(
            "{FOLLOW_SELECT} WHERE ff.user_id = ? ORDER BY f.name, f.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedFollowRow::into_follow).collect())
    }

    /// Remove a follow. Returns `false` if the user was not following the feed.
    pub async fn delete_feed_follow(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Users following a feed, ordered by name
    pub async fn get_feed_follow_owners(&self, feed_id: i64) -> Result<Vec<User>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.name, u.created_at, u.updated_at
            FROM feed_follows ff
            JOIN users u ON u.id = ff.user_id
            WHERE ff.feed_id = ?
            ORDER BY u.name
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }
}
