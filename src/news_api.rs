//! Read-path client for the record backend.
//!
//! The backend exposes a single `GET /news/latest` endpoint returning the
//! most recent record, or 404 when there is none.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const LATEST_NEWS_PATH: &str = "/news/latest";
/// Default base URL of the record backend.
pub const LOCAL_NEWS_API_BASE_URL: &str = "http://localhost:3000";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NewsApiDefaults;

impl NewsApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
}

#[derive(Clone, Debug)]
pub struct NewsApiClientOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for NewsApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: NewsApiDefaults::CONNECT_TIMEOUT,
            attempt_timeout: NewsApiDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Most recent record served by the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestNews {
    pub title: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

#[derive(Debug, Error)]
pub enum NewsApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("no news record found")]
    NotFound,

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl NewsApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::NotFound | Self::Parse(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct NewsApiClient {
    http: Client,
    base_url: String,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl NewsApiClient {
    pub fn new() -> Result<Self, NewsApiError> {
        Self::with_options(NewsApiClientOptions::default())
    }

    pub fn with_options(options: NewsApiClientOptions) -> Result<Self, NewsApiError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(NewsApiError::Transport)?;

        Ok(Self {
            http,
            base_url: LOCAL_NEWS_API_BASE_URL.to_string(),
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Points the client at another backend, e.g. `http://10.0.0.2:3000`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the most recent record. A missing record is
    /// [`NewsApiError::NotFound`], which is never retried.
    pub async fn latest_news(&self) -> Result<LatestNews, NewsApiError> {
        let endpoint = format!("{}{}", self.base_url, LATEST_NEWS_PATH);
        let policy = self.retry_policy;

        retry_async(
            &policy,
            |attempt| {
                let endpoint = endpoint.clone();
                async move {
                    debug!(event = "news_latest_request", attempt, endpoint = %endpoint);
                    self.fetch_attempt(&endpoint).await
                }
            },
            NewsApiError::is_retryable,
        )
        .await
    }

    async fn fetch_attempt(&self, endpoint: &str) -> Result<LatestNews, NewsApiError> {
        let response = self
            .http
            .get(endpoint)
            .timeout(self.attempt_timeout)
            .send()
            .await
            .map_err(NewsApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(NewsApiError::Transport)?;

        if status == StatusCode::NOT_FOUND {
            return Err(NewsApiError::NotFound);
        }
        if !status.is_success() {
            return Err(NewsApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        parse_latest_news(&body)
    }
}

fn parse_latest_news(body: &str) -> Result<LatestNews, NewsApiError> {
    serde_json::from_str(body).map_err(|err| NewsApiError::Parse(err.to_string()))
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.message {
            Some(serde_json::Value::String(message)) => return message,
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
        if let Some(error) = parsed.error {
            return error;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{
        parse_latest_news, summarize_error_body, LatestNews, NewsApiClient, NewsApiError,
        LOCAL_NEWS_API_BASE_URL,
    };

    #[test]
    fn parses_latest_news_payload() {
        let body = r#"{"title":"BTC breaks out","created_at":"2025-03-02T12:39:44.831Z"}"#;
        assert_eq!(
            parse_latest_news(body).expect("parse"),
            LatestNews {
                title: "BTC breaks out".to_string(),
                created_at: "2025-03-02T12:39:44.831Z".to_string(),
            }
        );
    }

    #[test]
    fn rejects_payload_without_title() {
        let error = parse_latest_news(r#"{"created_at":"x"}"#).expect_err("missing title");
        assert!(matches!(error, NewsApiError::Parse(_)));
    }

    #[test]
    fn summarizes_framework_error_bodies() {
        let body = r#"{"statusCode":500,"message":"database unavailable","error":"Internal Server Error"}"#;
        assert_eq!(summarize_error_body(body), "database unavailable");
        assert_eq!(summarize_error_body("oops"), "oops");
    }

    #[test]
    fn not_found_is_not_retryable() {
        assert!(!NewsApiError::NotFound.is_retryable());
        assert!(NewsApiError::HttpStatus {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
        .is_retryable());
        assert!(!NewsApiError::HttpStatus {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn base_url_defaults_to_local_backend_and_can_be_overridden() {
        let client = NewsApiClient::new().expect("build client");
        assert_eq!(client.base_url(), LOCAL_NEWS_API_BASE_URL);

        let client = client.with_base_url("http://10.0.0.2:3000/");
        assert_eq!(client.base_url(), "http://10.0.0.2:3000");
    }
}
