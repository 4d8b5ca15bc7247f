//! LibCal room-booking API.
//!
//! Tokens come from the OAuth client-credentials endpoint; bookings are listed
//! per date window through `space/bookings`, one page at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use wstorage::config::CredentialProvider;
use wstorage::errors::Result as StorageResult;
use wstorage::fetch::{RemoteSource, Token};
use wstorage::models::{DateWindow, RawRecord};

use crate::client::{ApiClient, DEFAULT_TIMEOUT, access_token};
use crate::error::{FetchError, Result};

pub const LIBCAL_URL: &str = "LIBCAL_URL";
pub const LIBCAL_CLIENT_ID: &str = "LIBCAL_CLIENT_ID";
pub const LIBCAL_CLIENT_SECRET: &str = "LIBCAL_CLIENT_SECRET";

#[derive(Clone)]
pub struct LibCalConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl LibCalConfig {
    pub fn from_credentials(credentials: &dyn CredentialProvider) -> StorageResult<Self> {
        Ok(Self {
            base_url: credentials.require(LIBCAL_URL)?,
            client_id: credentials.require(LIBCAL_CLIENT_ID)?,
            client_secret: credentials.require(LIBCAL_CLIENT_SECRET)?,
        })
    }
}

impl std::fmt::Debug for LibCalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibCalConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub lid: i64,
    pub name: String,
    #[serde(default)]
    pub public: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LibCalClient {
    api: ApiClient,
    config: LibCalConfig,
}

impl LibCalClient {
    pub fn new(config: LibCalConfig) -> Result<Self> {
        let api = ApiClient::new(&config.base_url, DEFAULT_TIMEOUT)?;
        Ok(Self { api, config })
    }

    async fn request_token(&self) -> Result<Option<Token>> {
        let payload = json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
            "grant_type": "client_credentials",
        });
        match self
            .api
            .send_json(self.api.post("oauth/token").json(&payload))
            .await
        {
            Ok(reply) => Ok(access_token(&reply).map(Token::new)),
            Err(FetchError::Unauthorized(body)) | Err(FetchError::Status { body, .. }) => {
                log::warn!("LibCal refused the client credentials: {}", body);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn list_bookings(
        &self,
        token: &Token,
        window: &DateWindow,
        page: u32,
        limit: u32,
    ) -> Result<Vec<RawRecord>> {
        let request = self.api.get("space/bookings").bearer_auth(token.secret()).query(&[
            ("date", window.start.format("%Y-%m-%d").to_string()),
            ("days", window.days.to_string()),
            ("limit", limit.to_string()),
            ("page", page.to_string()),
        ]);
        let payload = self.api.send_json(request).await?;
        bookings_from_payload(payload)
    }

    /// Library locations visible to the client credentials.
    pub async fn locations(&self) -> Result<Vec<Location>> {
        let token = self
            .request_token()
            .await?
            .ok_or_else(|| FetchError::Unauthorized("no access token issued".to_string()))?;
        let payload = self
            .api
            .send_json(self.api.get("space/locations").bearer_auth(token.secret()))
            .await?;
        Ok(serde_json::from_value(payload)?)
    }
}

/// Accepts a bare array, an object wrapping it under `data`, or `null`.
fn bookings_from_payload(payload: Value) -> Result<Vec<RawRecord>> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(mut wrapper) => match wrapper.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(FetchError::UnexpectedPayload(format!(
                    "bookings 'data' is not an array: {other}"
                )));
            }
        },
        other => {
            return Err(FetchError::UnexpectedPayload(format!(
                "bookings response is not a list: {other}"
            )));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(FetchError::UnexpectedPayload(format!(
                "booking is not an object: {other}"
            ))),
        })
        .collect()
}

#[async_trait]
impl RemoteSource for LibCalClient {
    fn name(&self) -> &'static str {
        "libcal"
    }

    async fn get_token(&self) -> StorageResult<Option<Token>> {
        Ok(self.request_token().await?)
    }

    async fn fetch_page(
        &self,
        token: &Token,
        window: &DateWindow,
        page: u32,
        limit: u32,
    ) -> StorageResult<Vec<RawRecord>> {
        Ok(self.list_bookings(token, window, page, limit).await?)
    }
}
