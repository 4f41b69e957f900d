use chrono::{DateTime, Utc};

use crate::feed::ParsedFeedItem;
use crate::storage::{Database, DatabaseError, InsertOutcome, NewPost};
use crate::util::extract_text;

/// Counts from one persist call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Posts stored for the first time
    pub inserted: usize,
    /// Items without a link plus items whose URL was already stored
    pub skipped: usize,
}

/// Store the new posts among `items` and stamp the feed as fetched.
///
/// The canonical URL of an item is its link with surrounding whitespace
/// removed. Items without one are skipped. Descriptions are reduced to plain
/// text. A URL already present, from this feed or any other, is skipped
/// rather than treated as an error, so persisting the same items any number
/// of times stores each post once.
///
/// The feed's `last_fetched_at` is set to `fetched_at` in the same
/// transaction, even when nothing new was found.
pub async fn persist(
    db: &Database,
    feed_id: i64,
    items: &[ParsedFeedItem],
    fetched_at: DateTime<Utc>,
) -> Result<PersistSummary, DatabaseError> {
    let mut summary = PersistSummary::default();

    let posts: Vec<NewPost> = items
        .iter()
        .filter_map(|item| {
            let url = item.link.trim();
            if url.is_empty() {
                tracing::debug!(feed_id = feed_id, title = %item.title, "Skipping item without link");
                summary.skipped += 1;
                return None;
            }
            Some(NewPost {
                feed_id,
                url: url.to_string(),
                title: item.title.trim().to_string(),
                description: item.description.as_deref().and_then(plain_description),
                published_at: item.published_at,
            })
        })
        .collect();

    let outcomes = db.store_fetched_posts(feed_id, &posts, fetched_at).await?;
    for outcome in outcomes {
        match outcome {
            InsertOutcome::Inserted => summary.inserted += 1,
            InsertOutcome::AlreadyExists => summary.skipped += 1,
        }
    }

    Ok(summary)
}

fn plain_description(raw: &str) -> Option<String> {
    let text = extract_text(raw);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed("Test", "https://feed.example.com/rss", None)
            .await
            .unwrap();
        (db, feed.id)
    }

    fn item(link: &str, title: &str) -> ParsedFeedItem {
        ParsedFeedItem {
            title: title.to_string(),
            link: link.to_string(),
            description: Some(format!("<p>About <em>{title}</em></p>")),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_persist_twice_is_idempotent() {
        let (db, feed_id) = setup().await;
        let items = vec![
            item("https://example.com/a", "A"),
            item("https://example.com/b", "B"),
            // Same URL published twice in one document
            item("https://example.com/a", "A again"),
        ];

        let first = persist(&db, feed_id, &items, Utc::now()).await.unwrap();
        assert_eq!(first, PersistSummary { inserted: 2, skipped: 1 });
        let after_first = db.count_posts().await.unwrap();

        let second = persist(&db, feed_id, &items, Utc::now()).await.unwrap();
        assert_eq!(second, PersistSummary { inserted: 0, skipped: 3 });
        assert_eq!(db.count_posts().await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_persist_skips_missing_links() {
        let (db, feed_id) = setup().await;
        let items = vec![item("", "No link"), item("   ", "Blank link"), item("https://example.com/ok", "Ok")];

        let summary = persist(&db, feed_id, &items, Utc::now()).await.unwrap();
        assert_eq!(summary, PersistSummary { inserted: 1, skipped: 2 });
    }

    #[tokio::test]
    async fn test_persist_trims_link_and_extracts_text() {
        let (db, feed_id) = setup().await;
        let items = vec![item("  https://example.com/a\n", "A")];

        persist(&db, feed_id, &items, Utc::now()).await.unwrap();

        let posts = db.get_posts_for_feed(feed_id).await.unwrap();
        assert_eq!(posts[0].url, "https://example.com/a");
        assert_eq!(posts[0].description.as_deref(), Some("About A"));
    }

    #[tokio::test]
    async fn test_persist_empty_description_stored_as_none() {
        let (db, feed_id) = setup().await;
        let mut only_markup = item("https://example.com/a", "A");
        only_markup.description = Some("<img src=\"x.png\">".to_string());

        persist(&db, feed_id, &[only_markup], Utc::now()).await.unwrap();

        let posts = db.get_posts_for_feed(feed_id).await.unwrap();
        assert_eq!(posts[0].description, None);
    }

    #[tokio::test]
    async fn test_persist_stamps_feed_without_new_items() {
        let (db, feed_id) = setup().await;
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        let summary = persist(&db, feed_id, &[], at).await.unwrap();
        assert_eq!(summary, PersistSummary::default());

        let feed = db
            .get_feed_by_url("https://feed.example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.last_fetched_at, Some(at));
    }
}
