use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use super::feeds::stamp_fetched;
use super::schema::Database;
use super::types::{to_millis, DatabaseError, InsertOutcome, NewPost, Post, PostRow};

/// Maximum number of posts returned by a single browse query
const MAX_BROWSE_LIMIT: i64 = 1000;

const POST_SELECT: &str = r#"
    SELECT p.id, p.feed_id, f.name AS feed_name, p.title, p.description, p.url,
           p.published_at, p.created_at
    FROM posts p
    JOIN feeds f ON f.id = p.feed_id
"#;

/// Insert unless a post with the same URL exists.
///
/// `ON CONFLICT(url) DO NOTHING` turns the uniqueness violation into a
/// zero-row insert, which is reported as `AlreadyExists`.
async fn insert_post<'e, E>(
    executor: E,
    post: &NewPost,
    now: i64,
) -> Result<InsertOutcome, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO posts (feed_id, title, description, url, published_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO NOTHING
    "#,
    )
    .bind(post.feed_id)
    .bind(&post.title)
    .bind(&post.description)
    .bind(&post.url)
    .bind(post.published_at.map(to_millis))
    .bind(now)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    Ok(if result.rows_affected() > 0 {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::AlreadyExists
    })
}

impl Database {
    // ========================================================================
    // Post Persistence
    // ========================================================================

    /// Insert a single post keyed on its URL.
    pub async fn insert_post_if_absent(
        &self,
        post: &NewPost,
    ) -> Result<InsertOutcome, DatabaseError> {
        insert_post(&self.pool, post, to_millis(Utc::now())).await
    }

    /// Store the posts of one fetch and stamp the feed, atomically.
    ///
    /// Posts are inserted in slice order. The feed's `last_fetched_at` is
    /// advanced to `fetched_at` in the same transaction, including when every
    /// post was already known or the slice is empty. Returns one outcome per
    /// post, in order.
    pub async fn store_fetched_posts(
        &self,
        feed_id: i64,
        posts: &[NewPost],
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<InsertOutcome>, DatabaseError> {
        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let mut outcomes = Vec::with_capacity(posts.len());
        for post in posts {
            outcomes.push(insert_post(&mut *tx, post, now).await?);
        }

        stamp_fetched(&mut *tx, feed_id, to_millis(fetched_at)).await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(outcomes)
    }

    // ========================================================================
    // Post Queries
    // ========================================================================

    /// Most recent posts from feeds the user follows.
    ///
    /// Ordered by publication date (undated posts last), newest first.
    /// `limit` is capped at 1000.
    pub async fn get_posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_BROWSE_LIMIT);
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"{POST_SELECT}
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?"#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Posts of a single feed in insertion order
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, DatabaseError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{POST_SELECT} WHERE p.feed_id = ? ORDER BY p.id"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    pub async fn count_posts(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Feed, InsertOutcome, NewPost};
    use chrono::{TimeZone, Utc};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn test_feed(db: &Database, n: u32) -> Feed {
        db.create_feed(
            &format!("Feed {n}"),
            &format!("https://feed{n}.example.com/rss"),
            None,
        )
        .await
        .unwrap()
    }

    fn test_post(feed_id: i64, slug: &str, day: u32) -> NewPost {
        NewPost {
            feed_id,
            url: format!("https://example.com/{slug}"),
            title: format!("Post {slug}"),
            description: Some("Body".to_string()),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_insert_post_if_absent() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let post = test_post(feed.id, "a", 1);

        assert_eq!(
            db.insert_post_if_absent(&post).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            db.insert_post_if_absent(&post).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(db.count_posts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_url_unique_across_feeds() {
        let db = test_db().await;
        let one = test_feed(&db, 1).await;
        let two = test_feed(&db, 2).await;

        db.insert_post_if_absent(&test_post(one.id, "shared", 1))
            .await
            .unwrap();
        let outcome = db
            .insert_post_if_absent(&test_post(two.id, "shared", 1))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        assert!(db.get_posts_for_feed(two.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_fetched_posts_stamps_feed() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();

        let outcomes = db.store_fetched_posts(feed.id, &[], at).await.unwrap();
        assert!(outcomes.is_empty());

        let stored = db.get_feed_by_url(&feed.url).await.unwrap().unwrap();
        assert_eq!(stored.last_fetched_at, Some(at));
    }

    #[tokio::test]
    async fn test_store_fetched_posts_preserves_order() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let posts = vec![
            test_post(feed.id, "c", 3),
            test_post(feed.id, "a", 1),
            test_post(feed.id, "b", 2),
        ];

        db.store_fetched_posts(feed.id, &posts, Utc::now())
            .await
            .unwrap();

        let urls: Vec<_> = db
            .get_posts_for_feed(feed.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/c",
                "https://example.com/a",
                "https://example.com/b"
            ]
        );
    }

    #[tokio::test]
    async fn test_store_fetched_posts_unknown_feed_rolls_back() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let posts = vec![test_post(feed.id, "a", 1)];

        assert!(db.store_fetched_posts(999, &posts, Utc::now()).await.is_err());
        assert_eq!(db.count_posts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_posts_for_user_only_followed_newest_first() {
        let db = test_db().await;
        let alice = db.create_user("alice").await.unwrap();
        let followed = db
            .register_feed("Followed", "https://followed.example.com/rss", &alice)
            .await
            .unwrap();
        let other = test_feed(&db, 9).await;

        let mut undated = test_post(followed.id, "undated", 1);
        undated.published_at = None;
        db.store_fetched_posts(
            followed.id,
            &[test_post(followed.id, "old", 1), undated, test_post(followed.id, "new", 5)],
            Utc::now(),
        )
        .await
        .unwrap();
        db.store_fetched_posts(other.id, &[test_post(other.id, "elsewhere", 9)], Utc::now())
            .await
            .unwrap();

        let titles: Vec<_> = db
            .get_posts_for_user(alice.id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Post new", "Post old", "Post undated"]);

        let limited = db.get_posts_for_user(alice.id, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].feed_name, "Followed");
    }
}
