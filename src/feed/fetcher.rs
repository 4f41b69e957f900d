use crate::shutdown::ShutdownSignal;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted response body
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from a single feed retrieval.
///
/// None of these are retried here; the scheduler decides when the feed is
/// polled again.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Shutdown was requested while the request was in flight
    #[error("Request cancelled")]
    Cancelled,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl FetchError {
    /// Short stable label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Timeout(_) => "timeout",
            FetchError::Cancelled => "cancelled",
            FetchError::ResponseTooLarge => "too_large",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // Client-level timeouts surface as reqwest errors
            FetchError::Timeout(Duration::ZERO)
        } else {
            FetchError::Network(err)
        }
    }
}

/// Fetch a feed's raw bytes with a single GET.
///
/// The whole exchange, body included, is bounded by `timeout`. If `shutdown`
/// fires first the request is dropped and `FetchError::Cancelled` returned.
///
/// # Errors
///
/// - [`FetchError::Timeout`] - the request did not finish in time
/// - [`FetchError::Cancelled`] - shutdown requested mid-flight
/// - [`FetchError::HttpStatus`] - non-2xx response
/// - [`FetchError::Network`] - connection, TLS or body read failure
/// - [`FetchError::ResponseTooLarge`] - body above [`MAX_FEED_SIZE`]
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    shutdown: &mut ShutdownSignal,
) -> Result<Vec<u8>, FetchError> {
    tokio::select! {
        biased;

        _ = shutdown.recv() => {
            tracing::debug!(url = %url, "Fetch cancelled by shutdown");
            Err(FetchError::Cancelled)
        }

        result = tokio::time::timeout(timeout, get_body(client, url)) => {
            result.map_err(|_| FetchError::Timeout(timeout))?
        }
    }
}

async fn get_body(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>http://x/1</link></item>
</channel></rss>"#;

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let bytes = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            &mut ShutdownSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            &mut ShutdownSignal::never(),
        )
        .await;

        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1) // No internal retry
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            &mut ShutdownSignal::never(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(500)));
        assert_eq!(err.kind(), "http_status");
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let result = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            timeout,
            &mut ShutdownSignal::never(),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Timeout(t)) if t == timeout));
        assert!(started.elapsed() < timeout + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fetch_cancelled_by_shutdown() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&mock_server)
            .await;

        let (trigger, mut signal) = shutdown::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger();
            // Keep the trigger alive until the fetch has observed it
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let client = reqwest::Client::new();
        let started = Instant::now();
        let result = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(30),
            &mut signal,
        )
        .await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network() {
        // Bind then drop a listener to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let err = fetch_feed(
            &client,
            &format!("http://{addr}/feed"),
            Duration::from_secs(5),
            &mut ShutdownSignal::never(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "network");
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_feed(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(10),
            &mut ShutdownSignal::never(),
        )
        .await;

        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }
}
