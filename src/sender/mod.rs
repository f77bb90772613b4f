//! # Sender Module
//!
//! One network delivery attempt per call, classified by HTTP status.
//!
//! This module handles:
//! - The [`Transport`] seam the publish loop and offline queue send through
//! - POSTing a [`Reading`] as JSON with the shared secret and user agent
//! - Bounded direct-send retries with jittered exponential wait ([`retry`])
//!
//! A transport never retries on its own. It returns the response status or
//! fails on transport errors (DNS, connect, timeout).

pub mod retry;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::reading::Reading;

pub use retry::{RetryPolicy, RetryingSender};

/// True for `200 <= code < 300`
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Trait for delivering one reading to the remote collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make exactly one delivery attempt and return the response status
    async fn send(&self, reading: &Reading) -> Result<u16>;
}

/// HTTP POST transport for the ingestion endpoint
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    endpoint_url: String,
    post_secret: String,
    user_agent: String,
}

impl HttpSender {
    /// Build a sender with a bounded per-request timeout
    ///
    /// # Arguments
    ///
    /// * `endpoint_url` - Collector URL readings are POSTed to
    /// * `post_secret` - Shared secret sent as the `Authorization` header
    /// * `user_agent` - `User-Agent` header value
    /// * `timeout` - Upper bound for the whole request
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised
    pub fn new(
        endpoint_url: impl Into<String>,
        post_secret: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint_url: endpoint_url.into(),
            post_secret: post_secret.into(),
            user_agent: user_agent.into(),
        })
    }

    /// Endpoint this sender posts to
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[async_trait]
impl Transport for HttpSender {
    async fn send(&self, reading: &Reading) -> Result<u16> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .header(AUTHORIZATION, &self.post_secret)
            .header(USER_AGENT, &self.user_agent)
            .json(reading)
            .send()
            .await?;

        let status = response.status().as_u16();
        debug!(status, ts_min = reading.ts_min, "POST {}", self.endpoint_url);
        Ok(status)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublisherError;

    fn reading(ts_min: i64) -> Reading {
        Reading {
            day: "2025-01-01".to_string(),
            ts_min,
            device_id: "dev1".to_string(),
            temp_c: Some(20.0),
            humidity_pct: None,
            pressure_hpa: None,
            ambient_lux: None,
            iaq: None,
            noise_db: None,
        }
    }

    #[test]
    fn test_is_success_boundaries() {
        assert!(!is_success(199));
        assert!(is_success(200));
        assert!(is_success(204));
        assert!(is_success(299));
        assert!(!is_success(300));
        assert!(!is_success(401));
        assert!(!is_success(503));
    }

    #[test]
    fn test_http_sender_keeps_endpoint() {
        let sender = HttpSender::new(
            "http://127.0.0.1:9/ingest",
            "secret",
            "env-publisher/test",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(sender.endpoint_url(), "http://127.0.0.1:9/ingest");
    }

    #[tokio::test]
    async fn test_http_sender_connection_refused_is_error() {
        // Port 9 (discard) is not expected to be listening on loopback
        let sender = HttpSender::new(
            "http://127.0.0.1:9/ingest",
            "secret",
            "env-publisher/test",
            Duration::from_millis(500),
        )
        .unwrap();

        let result = sender.send(&reading(1)).await;
        assert!(matches!(result, Err(PublisherError::Transport(_))));
    }

    #[tokio::test]
    async fn test_http_sender_posts_json_with_credentials() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            socket
                .write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8(request).unwrap()
        });

        let sender = HttpSender::new(
            format!("http://{}/ingest", addr),
            "secret",
            "env-publisher/test",
            Duration::from_secs(2),
        )
        .unwrap();

        let status = sender.send(&reading(28_928_160)).await.unwrap();
        assert_eq!(status, 201);

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /ingest HTTP/1.1"));
        assert!(lower.contains("authorization: secret"));
        assert!(lower.contains("user-agent: env-publisher/test"));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.ends_with(
            r#"{"day":"2025-01-01","ts_min":28928160,"deviceId":"dev1","temp_c":20.0}"#
        ));
    }
}
