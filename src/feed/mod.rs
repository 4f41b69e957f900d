//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - one timed, cancellable GET of a feed URL
//! - [`parser`] - RSS/Atom bytes to [`ParsedFeed`] using `feed-rs`
//!
//! Both are leaves: they know nothing about storage or scheduling.

mod fetcher;
mod parser;

pub use fetcher::{fetch_feed, FetchError, MAX_FEED_SIZE};
pub use parser::{parse_feed, ParseError, ParsedFeed, ParsedFeedItem};

use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirect hops followed for a feed URL
const MAX_REDIRECTS: usize = 3;

/// Build the HTTP client shared by every fetch.
///
/// Per-request timeouts are applied by [`fetch_feed`]; the client only caps
/// connection setup.
pub fn build_client(user_agent: &str) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(redirect_policy())
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Follow at most three redirects and refuse loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Reasons a URL cannot be registered as a feed.
#[derive(Debug, Error)]
pub enum FeedUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
}

/// Check that a user-supplied feed URL is an absolute http(s) URL.
///
/// Returns the URL trimmed but otherwise as given, since the stored URL is
/// the feed's identity.
pub fn validate_feed_url(raw: &str) -> Result<String, FeedUrlError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FeedUrlError::MissingHost);
    }

    Ok(trimmed.to_string())
}
