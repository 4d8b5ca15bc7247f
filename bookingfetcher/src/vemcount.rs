//! Vemcount foot-traffic API.
//!
//! The report endpoint answers one zone at a time and has no paging of its
//! own. Page 1 of a window fetches every zone's report and flattens them in
//! zone order; later pages are `limit`-sized slices of that flattened report.
//! Zones without observations contribute nothing, so only the slice past the
//! last observation of the last zone comes back empty.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use wstorage::config::CredentialProvider;
use wstorage::errors::Result as StorageResult;
use wstorage::fetch::{RemoteSource, Token};
use wstorage::models::{DateWindow, RawRecord};

use crate::client::{ApiClient, DEFAULT_TIMEOUT, access_token};
use crate::error::{FetchError, Result};

pub const VEMCOUNT_URL: &str = "VEMCOUNT_URL";
pub const VEMCOUNT_API_KEY: &str = "VEMCOUNT_API_KEY";

pub const PERIOD_STEP: &str = "30min";

#[derive(Clone)]
pub struct VemcountConfig {
    pub base_url: String,
    pub api_key: String,
}

impl VemcountConfig {
    pub fn from_credentials(credentials: &dyn CredentialProvider) -> StorageResult<Self> {
        Ok(Self {
            base_url: credentials.require(VEMCOUNT_URL)?,
            api_key: credentials.require(VEMCOUNT_API_KEY)?,
        })
    }
}

impl std::fmt::Debug for VemcountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VemcountConfig")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Flattened observations of every zone for one window.
struct WindowReport {
    window: DateWindow,
    records: Vec<RawRecord>,
}

pub struct VemcountClient {
    api: ApiClient,
    config: VemcountConfig,
    zones: Mutex<Option<Vec<Value>>>,
    report: Mutex<Option<WindowReport>>,
}

impl VemcountClient {
    pub fn new(config: VemcountConfig) -> Result<Self> {
        let api = ApiClient::new(&config.base_url, DEFAULT_TIMEOUT)?;
        Ok(Self {
            api,
            config,
            zones: Mutex::new(None),
            report: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<Option<Token>> {
        let request = self
            .api
            .post("auth/login")
            .header("Api-Key", &self.config.api_key);
        match self.api.send_json(request).await {
            Ok(reply) => Ok(access_token(&reply).map(Token::new)),
            Err(FetchError::Unauthorized(body)) | Err(FetchError::Status { body, .. }) => {
                log::warn!("Vemcount refused the API key: {}", body);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Zone ids of the first location, discovered once per client.
    pub async fn zones(&self, token: &Token) -> Result<Vec<Value>> {
        let mut cached = self.zones.lock().await;
        if let Some(zones) = cached.as_ref() {
            return Ok(zones.clone());
        }
        let payload = self
            .api
            .send_json(self.api.get("location").bearer_auth(token.secret()))
            .await?;
        let zones = zone_ids(&payload)?;
        log::info!("Vemcount exposes {} zone(s)", zones.len());
        *cached = Some(zones.clone());
        Ok(zones)
    }

    async fn zone_report(
        &self,
        token: &Token,
        zone: &Value,
        window: &DateWindow,
    ) -> Result<Vec<RawRecord>> {
        let zone_key = zone_key(zone);
        let request = self
            .api
            .post("report")
            .bearer_auth(token.secret())
            .query(&[
                ("source", "zones".to_string()),
                ("data", zone_key.clone()),
                ("data_output", "inside".to_string()),
                ("period_step", PERIOD_STEP.to_string()),
                ("form_date_from", window.start.format("%Y-%m-%d").to_string()),
                ("form_date_to", window.end().format("%Y-%m-%d").to_string()),
            ]);
        let payload = self.api.send_json(request).await?;
        let records = report_records(&payload, &zone_key, zone)?;
        log::debug!(
            "{} observation(s) for zone {} from {} to {}",
            records.len(),
            zone_key,
            window.start,
            window.end()
        );
        Ok(records)
    }

    async fn window_records(&self, token: &Token, window: &DateWindow) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for zone in self.zones(token).await? {
            records.extend(self.zone_report(token, &zone, window).await?);
        }
        log::info!(
            "Vemcount returned {} observation(s) from {} to {}",
            records.len(),
            window.start,
            window.end()
        );
        Ok(records)
    }
}

fn zone_key(zone: &Value) -> String {
    match zone {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn zone_ids(payload: &Value) -> Result<Vec<Value>> {
    let zones = payload
        .pointer("/data/0/zones/data")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::UnexpectedPayload("location response has no zone list".to_string())
        })?;
    zones
        .iter()
        .map(|zone| {
            zone.get("id")
                .filter(|id| !id.is_null())
                .cloned()
                .ok_or_else(|| FetchError::UnexpectedPayload(format!("zone without id: {zone}")))
        })
        .collect()
}

/// Flattens `yesterday.{zone}.dates.*.data` and tags each entry with its zone.
fn report_records(payload: &Value, zone_key: &str, zone: &Value) -> Result<Vec<RawRecord>> {
    let by_zone = payload
        .get("yesterday")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            FetchError::UnexpectedPayload("report response has no 'yesterday' section".to_string())
        })?;
    let dates = match by_zone.get(zone_key).and_then(|z| z.get("dates")) {
        Some(Value::Object(dates)) => dates,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(other) => {
            return Err(FetchError::UnexpectedPayload(format!(
                "dates of zone {zone_key} is not an object: {other}"
            )));
        }
    };
    let mut records = Vec::with_capacity(dates.len());
    for entry in dates.values() {
        let mut record = match entry.get("data") {
            Some(Value::Object(data)) => data.clone(),
            _ => {
                return Err(FetchError::UnexpectedPayload(format!(
                    "observation of zone {zone_key} has no data object"
                )));
            }
        };
        record.insert("zone_id".to_string(), zone.clone());
        records.push(record);
    }
    Ok(records)
}

/// Records of the 1-based `page` when `records` is cut into `limit`-sized pages.
fn page_slice(records: &[RawRecord], page: u32, limit: u32) -> Vec<RawRecord> {
    let offset = (page.max(1) as usize - 1).saturating_mul(limit as usize);
    records
        .iter()
        .skip(offset)
        .take(limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl RemoteSource for VemcountClient {
    fn name(&self) -> &'static str {
        "vemcount"
    }

    async fn get_token(&self) -> StorageResult<Option<Token>> {
        Ok(self.login().await?)
    }

    async fn fetch_page(
        &self,
        token: &Token,
        window: &DateWindow,
        page: u32,
        limit: u32,
    ) -> StorageResult<Vec<RawRecord>> {
        let mut report = self.report.lock().await;
        let stale = page <= 1 || report.as_ref().is_none_or(|cached| cached.window != *window);
        if stale {
            *report = None;
            let records = self.window_records(token, window).await?;
            *report = Some(WindowReport {
                window: *window,
                records,
            });
        }
        let records = report
            .as_ref()
            .map(|cached| cached.records.as_slice())
            .unwrap_or_default();
        Ok(page_slice(records, page, limit))
    }
}
