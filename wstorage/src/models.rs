use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};

/// An API-native payload for one booking or observation.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Values in the exact column order of the destination table.
pub type NormalizedRow = Vec<String>;

/// An inclusive date range submitted to an upstream in one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub days: u32,
}

impl DateWindow {
    pub fn new(start: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(StorageError::InvalidArg(
                "a date window must span at least one day".to_string(),
            ));
        }
        Ok(Self { start, days })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            days: 1,
        }
    }

    /// Last day covered by the window (inclusive).
    pub fn end(&self) -> NaiveDate {
        self.start + Duration::days(i64::from(self.days) - 1)
    }

    /// Splits `[start, end]` into consecutive windows of at most `max_days`.
    /// Returns nothing when `end < start`.
    pub fn split(start: NaiveDate, end: NaiveDate, max_days: u32) -> Result<Vec<DateWindow>> {
        if max_days == 0 {
            return Err(StorageError::InvalidArg(
                "maximum window span must be positive".to_string(),
            ));
        }
        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            let remaining = (end - cursor).num_days() + 1;
            let days = remaining.min(i64::from(max_days)) as u32;
            let window = DateWindow {
                start: cursor,
                days,
            };
            cursor = window.end() + Duration::days(1);
            windows.push(window);
        }
        Ok(windows)
    }
}

/// One bounded batch of records returned by a single paginated call.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub window: DateWindow,
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkOrigin {
    /// Max value of the watermark column in the destination table.
    Loaded,
    /// The destination table did not exist and was just created.
    Epoch,
    /// The table exists but holds no rows.
    EmptyTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub date: NaiveDate,
    pub origin: WatermarkOrigin,
}

impl Watermark {
    /// First day that still needs fetching. A loaded watermark day was
    /// complete when it was loaded, so extraction resumes on the next day.
    pub fn resume_date(&self) -> NaiveDate {
        match self.origin {
            WatermarkOrigin::Loaded => self.date + Duration::days(1),
            WatermarkOrigin::Epoch | WatermarkOrigin::EmptyTable => self.date,
        }
    }

    /// Resume point for a run with an optional explicit start date. The start
    /// date can skip ahead, but never rewinds past days already loaded.
    pub fn resume_from(&self, start_date: Option<NaiveDate>) -> NaiveDate {
        match (start_date, self.origin) {
            (Some(start), WatermarkOrigin::Loaded) => start.max(self.resume_date()),
            (Some(start), _) => start,
            (None, _) => self.resume_date(),
        }
    }
}

/// Parameters supplied by whatever triggers a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

impl SyncRequest {
    pub fn from_start_date(start_date: Option<NaiveDate>) -> Self {
        Self { start_date }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Loaded,
    NoNewData,
    Failed,
}

impl RunStatus {
    pub fn as_catalog_status(&self) -> &'static str {
        match self {
            RunStatus::Loaded => "SUCCESS",
            RunStatus::NoNewData => "NO_NEW_DATA",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Outcome of one coordinator run. Returned to the caller, recorded in the
/// catalog, never used as the next run's resume point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub source: String,
    pub success: bool,
    pub status: RunStatus,
    pub rows_loaded: usize,
    pub watermark: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub message: String,
}

impl SyncResult {
    pub fn loaded(source: &str, rows_loaded: usize, watermark: Option<NaiveDate>) -> Self {
        Self {
            source: source.to_string(),
            success: true,
            status: RunStatus::Loaded,
            rows_loaded,
            watermark,
            error_kind: None,
            message: format!("{rows_loaded} row(s) loaded for {source}"),
        }
    }

    pub fn no_new_data(source: &str, watermark: Option<NaiveDate>, message: String) -> Self {
        Self {
            source: source.to_string(),
            success: true,
            status: RunStatus::NoNewData,
            rows_loaded: 0,
            watermark,
            error_kind: None,
            message,
        }
    }

    pub fn failed(source: &str, err: &StorageError) -> Self {
        Self {
            source: source.to_string(),
            success: false,
            status: RunStatus::Failed,
            rows_loaded: 0,
            watermark: None,
            error_kind: Some(err.kind().to_string()),
            message: err.to_string(),
        }
    }
}

// --- Run Catalog (SQLite) Models ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: i64,
    pub source: String,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub rows_loaded: i64,
    pub watermark: Option<String>,
    pub message: Option<String>,
}
