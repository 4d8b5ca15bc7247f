use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::{FetchError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin wrapper over `reqwest::Client` bound to one upstream base URL.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(FetchError::Config("base URL is empty".to_string()));
        }
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub fn get(&self, endpoint: &str) -> RequestBuilder {
        self.http_client.get(self.url(endpoint))
    }

    pub fn post(&self, endpoint: &str) -> RequestBuilder {
        self.http_client.post(self.url(endpoint))
    }

    /// Sends the request and decodes a JSON body. 401 becomes
    /// `FetchError::Unauthorized`, any other non-2xx `FetchError::Status`.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized(
                response.text().await.unwrap_or_default(),
            ));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Pulls `access_token` out of a token endpoint reply.
pub fn access_token(payload: &Value) -> Option<String> {
    payload
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_urls_are_joined_with_a_single_slash() {
        let client = ApiClient::new("https://example.libcal.com/1.1", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "https://example.libcal.com/1.1/");
        assert_eq!(
            client.url("/space/bookings"),
            "https://example.libcal.com/1.1/space/bookings"
        );
        assert_eq!(
            client.url("oauth/token"),
            "https://example.libcal.com/1.1/oauth/token"
        );
    }

    #[test]
    fn test_empty_base_url_is_rejected() {
        assert!(matches!(
            ApiClient::new("  ", DEFAULT_TIMEOUT),
            Err(FetchError::Config(_))
        ));
    }

    #[test]
    fn test_access_token_extraction() {
        assert_eq!(
            access_token(&json!({"access_token": "abc", "expires_in": 3600})),
            Some("abc".to_string())
        );
        assert_eq!(access_token(&json!({"access_token": ""})), None);
        assert_eq!(access_token(&json!({"error": "invalid_client"})), None);
    }
}
