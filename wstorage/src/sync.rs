use crate::catalog::Catalog;
use crate::config::SyncSettings;
use crate::errors::{Result, StorageError};
use crate::fetch::{RemotePaginator, RemoteSource};
use crate::models::{DateWindow, SyncRequest, SyncResult, Watermark, WatermarkOrigin};
use crate::schema_registry::{DataSource, SCHEMA_REGISTRY};
use crate::warehouse::Warehouse;
use crate::watermark::{self, WatermarkStore};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Source of "today" for watermark and ceiling computations.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Stages of one run, in order. `Failed` is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    ResolveWatermark,
    BootstrapTable,
    Extract,
    Normalize,
    Load,
    AdvanceWatermark,
    Done,
    Failed,
}

/// Defines the interface for running incremental loads.
#[async_trait]
pub trait DataSynchronizer {
    /// Registers the upstream endpoint feeding a registry source.
    fn register_source(&self, source: Arc<dyn RemoteSource>) -> Result<()>;

    /// Names of the sources that can currently be synced.
    fn registered_sources(&self) -> Vec<&'static str>;

    /// Runs one full extraction-load pass for `source`.
    ///
    /// Precondition: runs against the same source never overlap. Nothing in
    /// here locks the destination table; the caller serializes invocations.
    async fn run_sync(&self, source: &str, request: SyncRequest) -> SyncResult;
}

pub struct WarehouseSynchronizer {
    catalog: Arc<Catalog>,
    warehouse: Arc<dyn Warehouse>,
    watermarks: WatermarkStore,
    sources: RwLock<HashMap<&'static str, Arc<dyn RemoteSource>>>,
    settings: SyncSettings,
    table_prefix: Option<String>,
    clock: Arc<dyn Clock>,
}

impl WarehouseSynchronizer {
    pub fn new(
        catalog: Arc<Catalog>,
        warehouse: Arc<dyn Warehouse>,
        settings: SyncSettings,
        table_prefix: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let watermarks = WatermarkStore::new(Arc::clone(&warehouse), settings.epoch);
        Self {
            catalog,
            warehouse,
            watermarks,
            sources: RwLock::new(HashMap::new()),
            settings,
            table_prefix,
            clock,
        }
    }

    pub fn table_for(&self, source: &DataSource) -> String {
        source.table_name(self.table_prefix.as_deref())
    }

    fn remote_for(&self, name: &str) -> Result<Arc<dyn RemoteSource>> {
        let sources = self
            .sources
            .read()
            .map_err(|_| StorageError::Other(anyhow::anyhow!("source registry lock poisoned")))?;
        sources.get(name).cloned().ok_or_else(|| {
            StorageError::Config(format!("no upstream registered for source '{name}'"))
        })
    }

    /// Walks backward from yesterday until a day with upstream data is found.
    ///
    /// Returns `None` when every day down to `floor` is empty, which means
    /// there is nothing new. Fails once `probe_limit_days` days were probed
    /// without reaching `floor`.
    async fn find_ceiling(
        &self,
        paginator: &mut RemotePaginator,
        yesterday: NaiveDate,
        floor: NaiveDate,
    ) -> Result<Option<NaiveDate>> {
        let mut day = yesterday;
        for _ in 0..self.settings.probe_limit_days {
            if day < floor {
                return Ok(None);
            }
            if paginator.probe_day(day).await? {
                return Ok(Some(day));
            }
            day -= Duration::days(1);
        }
        if day < floor {
            return Ok(None);
        }
        Err(StorageError::CeilingNotFound(self.settings.probe_limit_days))
    }

    fn no_new_data(&self, source: &DataSource, watermark: &Watermark, reason: String) -> SyncResult {
        log::warn!("[{}] No new data to extract: {}", source.name, reason);
        let current = match watermark.origin {
            WatermarkOrigin::Loaded => Some(watermark.date),
            WatermarkOrigin::Epoch | WatermarkOrigin::EmptyTable => None,
        };
        SyncResult::no_new_data(source.name, current, format!("no new data: {reason}"))
    }

    fn enter(&self, source: &DataSource, stage: &mut SyncStage, next: SyncStage) {
        log::debug!("[{}] {:?} -> {:?}", source.name, stage, next);
        *stage = next;
    }

    async fn execute(
        &self,
        name: &str,
        request: &SyncRequest,
        stage: &mut SyncStage,
    ) -> Result<SyncResult> {
        let source = SCHEMA_REGISTRY.source(name)?;
        let remote = self.remote_for(name)?;
        let table = self.table_for(source);
        let today = self.clock.today();
        let yesterday = watermark::yesterday(today);

        // RESOLVE_WATERMARK, passing through BOOTSTRAP_TABLE when the table is missing.
        let watermark = self.watermarks.get_watermark(source, &table)?;
        if watermark.origin == WatermarkOrigin::Epoch {
            self.enter(source, stage, SyncStage::BootstrapTable);
        }
        log::info!(
            "[{}] Last date retrieved: {} ({:?})",
            source.name,
            watermark.date,
            watermark.origin
        );

        let resume = watermark.resume_from(request.start_date);
        if let Some(start) = request.start_date.filter(|start| *start < resume) {
            log::warn!(
                "[{}] Start date {} is already loaded, resuming from {}",
                source.name,
                start,
                resume
            );
        }
        if resume > yesterday {
            return Ok(self.no_new_data(
                source,
                &watermark,
                format!("resume date {resume} is after {yesterday}"),
            ));
        }

        self.enter(source, stage, SyncStage::Extract);
        let mut paginator = RemotePaginator::new(remote, self.settings.page_size);
        let ceiling = match self.find_ceiling(&mut paginator, yesterday, resume).await? {
            Some(ceiling) => ceiling,
            None => {
                return Ok(self.no_new_data(
                    source,
                    &watermark,
                    format!("upstream has no records between {resume} and {yesterday}"),
                ));
            }
        };
        log::info!("[{}] Upstream ceiling: {}", source.name, ceiling);

        let windows = DateWindow::split(resume, ceiling, source.max_window_days)?;
        let mut records = Vec::new();
        for window in windows {
            log::info!(
                "[{}] Retrieving {}..{} ({} day(s))",
                source.name,
                window.start,
                window.end(),
                window.days
            );
            let batch = paginator.fetch_window(window).await?;
            log::info!(
                "[{}] {} record(s) retrieved up to {}",
                source.name,
                batch.len(),
                window.end()
            );
            records.extend(batch);
        }
        if records.is_empty() {
            return Ok(self.no_new_data(
                source,
                &watermark,
                format!("upstream returned no records between {resume} and {ceiling}"),
            ));
        }

        self.enter(source, stage, SyncStage::Normalize);
        let date_idx = source.watermark_index()?;
        let mut rows = Vec::with_capacity(records.len());
        let mut newest: Option<NaiveDate> = None;
        let mut outside_window = 0usize;
        for (idx, record) in records.iter().enumerate() {
            let row = source.normalize(record);
            let date = source.date_encoding.parse(&row[date_idx]).map_err(|err| {
                StorageError::MalformedRecord(format!(
                    "{} record #{} field '{}': {}",
                    source.name, idx, source.watermark_field, err
                ))
            })?;
            if date < resume || date > ceiling {
                outside_window += 1;
                continue;
            }
            newest = newest.max(Some(date));
            rows.push(row);
        }
        if outside_window > 0 {
            log::warn!(
                "[{}] {} record(s) dated outside {}..{} were left for another run",
                source.name,
                outside_window,
                resume,
                ceiling
            );
        }
        if rows.is_empty() {
            return Ok(self.no_new_data(
                source,
                &watermark,
                format!("no records dated between {resume} and {ceiling}"),
            ));
        }

        self.enter(source, stage, SyncStage::Load);
        let loaded = self.warehouse.bulk_insert(&table, source.fields, &rows)?;

        self.enter(source, stage, SyncStage::AdvanceWatermark);
        let previous = match watermark.origin {
            WatermarkOrigin::Loaded => Some(watermark.date),
            WatermarkOrigin::Epoch | WatermarkOrigin::EmptyTable => None,
        };
        let advanced = newest
            .max(previous)
            .map(|date| watermark::clamp_to_yesterday(date, today));
        log::info!(
            "[{}] {} row(s) loaded into '{}', data retrieved up to {:?}",
            source.name,
            loaded,
            table,
            advanced
        );

        self.enter(source, stage, SyncStage::Done);
        Ok(SyncResult::loaded(source.name, loaded, advanced))
    }
}

#[async_trait]
impl DataSynchronizer for WarehouseSynchronizer {
    fn register_source(&self, source: Arc<dyn RemoteSource>) -> Result<()> {
        let name = SCHEMA_REGISTRY.source(source.name())?.name;
        let mut sources = self
            .sources
            .write()
            .map_err(|_| StorageError::Other(anyhow::anyhow!("source registry lock poisoned")))?;
        sources.insert(name, source);
        Ok(())
    }

    fn registered_sources(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .sources
            .read()
            .map(|sources| sources.keys().copied().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    async fn run_sync(&self, source: &str, request: SyncRequest) -> SyncResult {
        log::info!("Starting {} sync", source);
        let run_id = match self.catalog.create_run(source) {
            Ok(run_id) => Some(run_id),
            Err(err) => {
                log::error!("Could not record the start of the {} run: {}", source, err);
                None
            }
        };

        let mut stage = SyncStage::ResolveWatermark;
        let result = match self.execute(source, &request, &mut stage).await {
            Ok(result) => result,
            Err(err) => {
                log::error!(
                    "[{}] Sync failed during {:?}: {}. Process aborted",
                    source,
                    stage,
                    err
                );
                stage = SyncStage::Failed;
                SyncResult::failed(source, &err)
            }
        };
        log::debug!("[{}] finished in {:?}", source, stage);

        if let Some(run_id) = run_id {
            if let Err(err) = self.catalog.finish_run(run_id, &result) {
                log::error!("Could not record the outcome of the {} run: {}", source, err);
            }
        }
        result
    }
}
