//! HTTP client adapter for governed third-party APIs.
//!
//! Turns every response into either a JSON body or a typed [`FetchError`],
//! so the governor's retry decision is a match on the error variant.

mod response;

pub use response::{classify_status, error_message};

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::governor::FetchError;

pub const USER_AGENT: &str = concat!("biolink/", env!("CARGO_PKG_VERSION"));

/// Shared `reqwest` client. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    /// Create a client with the given user agent and request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// GET a JSON document.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer_token: Option<&str>,
    ) -> Result<Value, FetchError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        Self::send(request, url).await
    }

    /// POST a form with HTTP basic authentication and read a JSON reply.
    pub async fn post_form_basic(
        &self,
        url: &str,
        form: &[(&str, &str)],
        username: &str,
        password: &str,
    ) -> Result<Value, FetchError> {
        let request = self
            .client
            .post(url)
            .basic_auth(username, Some(password))
            .form(form);
        Self::send(request, url).await
    }

    async fn send(request: RequestBuilder, url: &str) -> Result<Value, FetchError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        debug!("{} -> {} ({} bytes)", url, status, body.len());

        classify_status(status, retry_after.as_deref(), &body)?;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
