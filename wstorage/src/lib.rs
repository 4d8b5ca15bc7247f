pub mod catalog;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod models;
pub mod schema_registry;
pub mod sync;
pub mod warehouse;
pub mod watermark;

use crate::catalog::Catalog;
use crate::config::{StorageConfig, SyncSettings};
use crate::errors::Result;
use crate::fetch::RemoteSource;
use crate::models::SyncRun;
use crate::sync::{Clock, DataSynchronizer, SystemClock, WarehouseSynchronizer};
use crate::warehouse::{SqliteWarehouse, Warehouse};
use std::sync::Arc;

/// The main entry point for the `wstorage` library.
///
/// `WStorage` wires together everything an incremental load needs:
/// - A SQL warehouse (`Warehouse`) holding one text-typed table per data source.
/// - A run catalog (`Catalog`) using SQLite to keep the refresh history.
/// - A synchronizer (`WarehouseSynchronizer`) that resumes each source from
///   the newest date already present in its table.
///
/// # Example
///
/// ```rust,no_run
/// use wstorage::{WStorage, config::StorageConfig, models::SyncRequest, sync::DataSynchronizer};
/// use tempfile::tempdir;
///
/// #[tokio::main]
/// async fn main() {
///     let dir = tempdir().unwrap();
///     let storage = WStorage::new(StorageConfig::new(dir.path())).unwrap();
///
///     // Register upstream clients, then:
///     let result = storage.synchronizer.run_sync("libcal", SyncRequest::default()).await;
///     println!("{}", result.message);
/// }
/// ```
pub struct WStorage {
    pub config: StorageConfig,
    pub catalog: Arc<Catalog>,
    pub warehouse: Arc<dyn Warehouse>,
    pub synchronizer: Arc<WarehouseSynchronizer>,
}

impl WStorage {
    /// Opens the warehouse and catalog under the configured paths with the
    /// default sync settings and the system clock.
    pub fn new(config: StorageConfig) -> Result<Self> {
        Self::with_settings(config, SyncSettings::default(), Arc::new(SystemClock))
    }

    pub fn with_settings(
        config: StorageConfig,
        settings: SyncSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let warehouse: Arc<dyn Warehouse> = Arc::new(SqliteWarehouse::new(&config)?);

        let synchronizer = Arc::new(WarehouseSynchronizer::new(
            Arc::clone(&catalog),
            Arc::clone(&warehouse),
            settings,
            config.table_prefix.clone(),
            clock,
        ));

        Ok(Self {
            config,
            catalog,
            warehouse,
            synchronizer,
        })
    }

    pub fn register_source(&self, source: Arc<dyn RemoteSource>) -> Result<()> {
        let name = source.name();
        self.synchronizer.register_source(source)?;
        log::info!("Registered upstream for '{}'", name);
        Ok(())
    }

    /// Refresh history, most recent first.
    pub fn run_history(&self, source: Option<&str>, limit: usize) -> Result<Vec<SyncRun>> {
        self.catalog.list_runs(source, limit)
    }
}
