// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
enum Failure {
    /// Worth another attempt (network error, timeout, 429, 5xx)
    Transient(String),
    /// Retrying cannot help (other non-2xx statuses)
    Permanent(String),
}

/// Text fetcher with bounded timeout and bounded retries per URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Create a fetcher from HTTP settings.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    /// Fetch a URL and return its body as text.
    ///
    /// Fails with [`AppError::Fetch`] once the attempts are used up or on a
    /// permanent HTTP failure.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let attempts = self.max_retries + 1;
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(Failure::Permanent(message)) => return Err(AppError::fetch(url, message)),
                Err(Failure::Transient(message)) => {
                    log::debug!("Attempt {attempt}/{attempts} for {url} failed: {message}");
                    last = message;
                }
            }

            if attempt < attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(AppError::fetch(
            url,
            format!("{last} (gave up after {attempts} attempts)"),
        ))
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, Failure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Failure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status}");
            return Err(if is_retryable(status) {
                Failure::Transient(message)
            } else {
                Failure::Permanent(message)
            });
        }

        response
            .text()
            .await
            .map_err(|e| Failure::Transient(e.to_string()))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Address of a server that accepts connections and never answers.
#[cfg(test)]
pub(crate) fn silent_server() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(max_retries: u32) -> HttpFetcher {
        let config = HttpConfig {
            max_retries,
            retry_delay_ms: 0,
            timeout_secs: 5,
            ..HttpConfig::default()
        };
        HttpFetcher::new(&config).unwrap()
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_fetch_text_ok() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *")
            .create_async()
            .await;

        let body = fetcher(0)
            .fetch_text(&format!("{}/robots.txt", server.url()))
            .await
            .unwrap();
        assert_eq!(body, "User-agent: *");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sitemap.xml")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = fetcher(3)
            .fetch_text(&format!("{}/sitemap.xml", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sitemap.xml")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = fetcher(2)
            .fetch_text(&format!("{}/sitemap.xml", server.url()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 attempts"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let config = HttpConfig {
            max_retries: 1,
            retry_delay_ms: 0,
            timeout_secs: 1,
            ..HttpConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let url = format!("{}/sitemap.xml", silent_server());

        let result = tokio::time::timeout(Duration::from_secs(10), fetcher.fetch_text(&url))
            .await
            .expect("request timeout not applied");
        match result {
            Err(AppError::Fetch { url: failed, message }) => {
                assert_eq!(failed, url);
                assert!(message.contains("2 attempts"), "{message}");
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
}
