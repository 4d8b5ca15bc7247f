use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::errors::{Result, StorageError};
use crate::models::{NormalizedRow, RawRecord};

/// Wire format of a source's watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateEncoding {
    /// `2024-03-01T09:30:00+11:00`
    OffsetDateTime,
    /// `2024-03-01 09:30:00`
    NaiveDateTime,
    /// `2024-03-01`
    Date,
}

impl DateEncoding {
    /// Converts a stored or upstream value into the calendar date it belongs
    /// to. Offset timestamps keep their local date.
    pub fn parse(&self, raw: &str) -> Result<NaiveDate> {
        let raw = raw.trim();
        let parsed = match self {
            DateEncoding::OffsetDateTime => DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
                .or_else(|_| DateTime::parse_from_rfc3339(raw))
                .map(|dt| dt.date_naive()),
            DateEncoding::NaiveDateTime => {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
            }
            DateEncoding::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d"),
        };
        parsed.map_err(|err| {
            StorageError::MalformedRecord(format!("cannot parse '{raw}' as {self:?}: {err}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: &'static str,
    /// Canonical column order, used by both DDL and normalization.
    pub fields: &'static [&'static str],
    pub table: &'static str,
    pub watermark_field: &'static str,
    pub date_encoding: DateEncoding,
    /// Longest span the upstream accepts in one request.
    pub max_window_days: u32,
}

impl DataSource {
    pub fn table_name(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}_{}", prefix, self.table),
            _ => self.table.to_string(),
        }
    }

    pub fn watermark_index(&self) -> Result<usize> {
        self.fields
            .iter()
            .position(|field| *field == self.watermark_field)
            .ok_or_else(|| {
                StorageError::Config(format!(
                    "watermark field '{}' is not a column of '{}'",
                    self.watermark_field, self.name
                ))
            })
    }

    /// Projects a record onto the field list. Missing fields become empty
    /// strings and fields not in the list are dropped.
    pub fn normalize(&self, record: &RawRecord) -> NormalizedRow {
        self.fields
            .iter()
            .map(|field| record.get(*field).map(cell_text).unwrap_or_default())
            .collect()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub const LIBCAL: DataSource = DataSource {
    name: "libcal",
    fields: &[
        "bookId",
        "eid",
        "location_name",
        "category_name",
        "item_name",
        "status",
        "fromDate",
        "toDate",
        "created",
    ],
    table: "libcal_bookings",
    watermark_field: "fromDate",
    date_encoding: DateEncoding::OffsetDateTime,
    max_window_days: 365,
};

pub const VEMCOUNT: DataSource = DataSource {
    name: "vemcount",
    fields: &["zone_id", "dt", "count_in", "count_out", "inside"],
    table: "vemcount",
    watermark_field: "dt",
    date_encoding: DateEncoding::NaiveDateTime,
    max_window_days: 365,
};

#[derive(Debug)]
pub struct SchemaRegistry {
    sources: HashMap<&'static str, DataSource>,
}

impl SchemaRegistry {
    fn builtin() -> Self {
        let sources = [LIBCAL, VEMCOUNT]
            .into_iter()
            .map(|source| (source.name, source))
            .collect();
        Self { sources }
    }

    pub fn source(&self, name: &str) -> Result<&DataSource> {
        self.sources
            .get(name)
            .ok_or_else(|| StorageError::UnknownSource(name.to_string()))
    }

    pub fn fields_for(&self, name: &str) -> Result<&'static [&'static str]> {
        Ok(self.source(name)?.fields)
    }

    pub fn table_name_for(&self, name: &str, prefix: Option<&str>) -> Result<String> {
        Ok(self.source(name)?.table_name(prefix))
    }

    /// Source names in a stable order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.sources.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn sources(&self) -> impl Iterator<Item = &DataSource> {
        self.sources.values()
    }
}

pub static SCHEMA_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::builtin);
