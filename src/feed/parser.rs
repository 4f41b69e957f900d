use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use thiserror::Error;

/// Feed bytes that could not be read as RSS, Atom or JSON Feed.
#[derive(Debug, Error)]
#[error("Parse error: {0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// A feed document reduced to what the aggregator stores.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    /// Items in document order
    pub items: Vec<ParsedFeedItem>,
}

/// One item of a feed, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeedItem {
    pub title: String,
    /// Empty when the item carries no link
    pub link: String,
    /// Raw markup as found in the feed
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parse raw feed bytes.
///
/// Dates the feed library cannot read leave `published_at` unset; they never
/// fail the whole document.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(bytes)?;

    let items = feed.entries.into_iter().map(parse_entry).collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        description: feed.description.map(|t| t.content).unwrap_or_default(),
        items,
    })
}

fn parse_entry(entry: Entry) -> ParsedFeedItem {
    let link = preferred_link(&entry.links)
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));

    ParsedFeedItem {
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        link,
        description,
        published_at: entry.published.or(entry.updated),
    }
}

/// Atom entries may list several links; the `alternate` one points at the post.
fn preferred_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;

    const MINIMAL_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <description>An example feed</description>
    <item>
        <title>T</title>
        <link>http://x/1</link>
        <description>&lt;p&gt;D&lt;/p&gt;</description>
        <pubDate>Mon, 02 Jan 2006 15:04:05 GMT</pubDate>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_minimal_rss() {
        let feed = parse_feed(MINIMAL_RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Example");
        assert_eq!(feed.description, "An example feed");
        assert_eq!(feed.items.len(), 1);

        let item = &feed.items[0];
        assert_eq!(item.title, "T");
        assert_eq!(item.link, "http://x/1");
        assert_eq!(item.description.as_deref().map(str::trim), Some("<p>D</p>"));

        let published = item.published_at.unwrap();
        assert_eq!(
            (published.year(), published.month(), published.day()),
            (2006, 1, 2)
        );
        assert_eq!(published.hour(), 15);
    }

    #[test]
    fn test_unparsable_date_left_unset() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>X</title>
    <item><title>A</title><link>http://x/a</link><pubDate>someday soon</pubDate></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].published_at, None);
    }

    #[test]
    fn test_items_keep_document_order() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>X</title>
    <item><title>Second</title><link>http://x/2</link><pubDate>Tue, 03 Jan 2006 00:00:00 GMT</pubDate></item>
    <item><title>First</title><link>http://x/1</link><pubDate>Mon, 02 Jan 2006 00:00:00 GMT</pubDate></item>
    <item><title>Third</title><link>http://x/3</link></item>
</channel></rss>"#;

        let titles: Vec<_> = parse_feed(rss.as_bytes())
            .unwrap()
            .items
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["Second", "First", "Third"]);
    }

    #[test]
    fn test_item_without_link() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>X</title>
    <item><title>No link</title><description>text</description></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(feed.items[0].link, "");
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Example</title>
    <id>urn:example:feed</id>
    <updated>2024-01-02T10:00:00Z</updated>
    <entry>
        <title>Entry</title>
        <id>urn:example:1</id>
        <link rel="self" href="http://x/self"/>
        <link rel="alternate" href="http://x/entry"/>
        <updated>2024-01-02T10:00:00Z</updated>
        <summary>Short</summary>
    </entry>
</feed>"#;

        let feed = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(feed.title, "Atom Example");
        let item = &feed.items[0];
        assert_eq!(item.link, "http://x/entry");
        assert_eq!(item.description.as_deref(), Some("Short"));
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_malformed_input_is_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }
}
