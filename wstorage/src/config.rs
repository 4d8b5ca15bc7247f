use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::{Result, StorageError};

/// Default lower bound used when nothing has been loaded for a source yet.
pub const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2020, 1, 1) {
    Some(date) => date,
    None => panic!("invalid epoch date"),
};

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PROBE_LIMIT_DAYS: u32 = 30;
pub const DEFAULT_TABLE_PREFIX: &str = "stg";

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub warehouse_path: PathBuf,
    pub catalog_path: PathBuf,
    /// Prepended to every destination table as `<prefix>_<table>`.
    pub table_prefix: Option<String>,
    pub environment: String,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            warehouse_path: base_path.join("warehouse.sqlite"),
            catalog_path: base_path.join("catalog.sqlite"),
            table_prefix: Some(DEFAULT_TABLE_PREFIX.to_string()),
            environment: "dev".to_string(),
        }
    }

    pub fn with_table_prefix(mut self, prefix: Option<String>) -> Self {
        self.table_prefix = prefix.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

/// Knobs of the extraction loop. Shared by every source.
#[derive(Deserialize, Debug, Clone)]
pub struct SyncSettings {
    pub page_size: u32,
    pub probe_limit_days: u32,
    pub epoch: NaiveDate,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            probe_limit_days: DEFAULT_PROBE_LIMIT_DAYS,
            epoch: EPOCH,
        }
    }
}

/// Opaque secret lookup. Absence is not an error at this layer.
pub trait CredentialProvider: Send + Sync {
    fn get_credential(&self, name: &str) -> Option<String>;

    fn require(&self, name: &str) -> Result<String> {
        self.get_credential(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StorageError::Config(format!("missing credential '{name}'")))
    }
}

/// Reads credentials from the process environment, after loading a `.env`
/// file when one is present.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                log::warn!("Failed to load .env file: {err}");
            }
        }
        Self
    }
}

impl CredentialProvider for EnvCredentials {
    fn get_credential(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_credential(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}
