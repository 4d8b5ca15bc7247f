use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{signal, sync::Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use wstorage::{
    catalog::Catalog,
    config::{EnvCredentials, StorageConfig, DEFAULT_TABLE_PREFIX},
    errors::StorageError,
    models::{SyncRequest, SyncResult, SyncRun},
    schema_registry::SCHEMA_REGISTRY,
    sync::DataSynchronizer,
    WStorage,
};

const DEFAULT_RUNS_LIMIT: usize = 50;
const MAX_RUNS_LIMIT: usize = 500;

/// Runs the command line interface for the sync agent.
pub async fn run_cli() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run_once(args).await?,
        Some(Command::Schedule(args)) => run_schedule(args).await?,
        Some(Command::Serve(args)) => run_server(args).await?,
        Some(Command::History(args)) => print_history(args)?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one incremental load for a single source
    Run(RunArgs),
    /// Syncs every configured source on a fixed interval until interrupted
    Schedule(ScheduleArgs),
    /// Starts the HTTP trigger service
    Serve(ServeArgs),
    /// Prints the recorded refresh history
    History(HistoryArgs),
}

#[derive(Args)]
struct StorageArgs {
    /// Directory holding the warehouse and run catalog databases
    #[arg(long, env = "SYNC_BASE_PATH")]
    base_path: PathBuf,
    /// Prefix for destination table names, empty for none
    #[arg(long, env = "SYNC_TABLE_PREFIX", default_value = DEFAULT_TABLE_PREFIX)]
    table_prefix: String,
    /// Deployment environment label
    #[arg(long, env = "ENVIRONMENT", default_value = "dev")]
    environment: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Source to sync (libcal, vemcount)
    #[arg(long)]
    source: String,
    /// Overrides the resume date (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
}

#[derive(Args)]
struct ScheduleArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Seconds between two passes over all sources
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 86_400)]
    interval_secs: u64,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Socket address to bind the trigger service
    #[arg(long, env = "SYNC_BIND", default_value = "127.0.0.1:3000")]
    bind: String,
}

#[derive(Args)]
struct HistoryArgs {
    #[command(flatten)]
    storage: StorageArgs,
    /// Only show runs of this source
    #[arg(long)]
    source: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<WStorage>,
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(storage: Arc<WStorage>) -> Self {
        Self {
            storage,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::InvalidArg(msg) | StorageError::Config(msg) => ApiError::BadRequest(msg),
            StorageError::UnknownSource(name) => {
                ApiError::NotFound(format!("unknown data source '{name}'"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        ApiError::from_storage(value)
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct RunsQuery {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceSummary {
    name: &'static str,
    table: String,
    watermark_field: &'static str,
    fields: &'static [&'static str],
    max_window_days: u32,
    registered: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    environment: String,
    registered_sources: Vec<&'static str>,
    sync_in_progress: bool,
    last_runs: Vec<SyncRun>,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Opens the storage and registers every upstream with credentials in the
/// environment (or a `.env` file).
fn open_storage(args: &StorageArgs) -> anyhow::Result<Arc<WStorage>> {
    let prefix = Some(args.table_prefix.clone());
    let config = StorageConfig::new(&args.base_path)
        .with_table_prefix(prefix)
        .with_environment(args.environment.clone());
    let storage = WStorage::new(config).context("failed to open warehouse storage")?;

    let credentials = EnvCredentials::load();
    for source in bookingfetcher::configured_sources(&credentials)? {
        storage.register_source(source)?;
    }
    if storage.synchronizer.registered_sources().is_empty() {
        warn!("No upstream credentials found; nothing can be synced");
    }
    Ok(Arc::new(storage))
}

fn report(result: &SyncResult) {
    if result.success {
        info!(
            source = %result.source,
            rows = result.rows_loaded,
            watermark = ?result.watermark,
            "{}",
            result.message
        );
    } else {
        error!(
            source = %result.source,
            kind = result.error_kind.as_deref().unwrap_or("unknown"),
            "{}",
            result.message
        );
    }
}

async fn run_once(args: RunArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.storage)?;
    let request = SyncRequest::from_start_date(args.start_date);
    let result = storage.synchronizer.run_sync(&args.source, request).await;
    report(&result);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!("{} sync failed: {}", args.source, result.message);
    }
    Ok(())
}

async fn run_schedule(args: ScheduleArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.storage)?;
    let interval = Duration::from_secs(args.interval_secs.max(1));
    info!("Syncing every {}s, press ctrl-c to stop", interval.as_secs());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        for source in storage.synchronizer.registered_sources() {
            let result = storage
                .synchronizer
                .run_sync(source, SyncRequest::default())
                .await;
            report(&result);
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;
    let storage = open_storage(&args.storage)?;

    let router = build_router(AppState::new(storage));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind trigger listener")?;
    info!("Sync agent listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("trigger server error")?;
    Ok(())
}

/// Reads the run catalog without opening the warehouse.
fn load_history(
    config: &StorageConfig,
    source: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<SyncRun>> {
    if !config.catalog_path.exists() {
        return Ok(Vec::new());
    }
    let catalog = Catalog::new(config).context("failed to open run catalog")?;
    catalog.initialize_schema()?;
    Ok(catalog.list_runs(source, limit)?)
}

fn print_history(args: HistoryArgs) -> anyhow::Result<()> {
    let config = StorageConfig::new(&args.storage.base_path);
    let runs = load_history(&config, args.source.as_deref(), args.limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        let started = chrono::DateTime::<chrono::Utc>::from_timestamp(run.start_time, 0)
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| run.start_time.to_string());
        println!(
            "#{:<5} {:<9} {:<12} {:>7} rows  watermark {:<10}  {}  {}",
            run.run_id,
            run.source,
            run.status,
            run.rows_loaded,
            run.watermark.as_deref().unwrap_or("-"),
            started,
            run.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Builds the HTTP router used by the trigger service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync/:source", post(trigger_sync))
        .route("/api/runs", get(list_runs))
        .route("/api/sources", get(list_sources))
        .route("/api/status", get(get_status))
        .with_state(state)
}

fn parse_sync_request(body: &[u8]) -> ApiResult<SyncRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SyncRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid sync request: {err}")))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SyncResult>)> {
    SCHEMA_REGISTRY.source(&source)?;
    let registered = state.storage.synchronizer.registered_sources();
    if !registered.iter().any(|name| *name == source) {
        return Err(ApiError::NotFound(format!(
            "no upstream registered for source '{source}'"
        )));
    }
    let request = parse_sync_request(&body)?;

    // Runs are serialized across all sources.
    let _guard = state.run_lock.lock().await;
    let result = state.storage.synchronizer.run_sync(&source, request).await;
    report(&result);

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(result)))
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<SyncRun>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUNS_LIMIT)
        .clamp(1, MAX_RUNS_LIMIT);
    let runs = state.storage.run_history(query.source.as_deref(), limit)?;
    Ok(Json(runs))
}

async fn list_sources(State(state): State<AppState>) -> ApiResult<Json<Vec<SourceSummary>>> {
    let registered = state.storage.synchronizer.registered_sources();
    let mut summaries = Vec::new();
    for name in SCHEMA_REGISTRY.names() {
        let source = SCHEMA_REGISTRY.source(name)?;
        summaries.push(SourceSummary {
            name: source.name,
            table: state.storage.synchronizer.table_for(source),
            watermark_field: source.watermark_field,
            fields: source.fields,
            max_window_days: source.max_window_days,
            registered: registered.contains(&source.name),
        });
    }
    Ok(Json(summaries))
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let registered = state.storage.synchronizer.registered_sources();
    let mut last_runs = Vec::new();
    for name in registered.iter().copied() {
        last_runs.extend(state.storage.run_history(Some(name), 1)?);
    }
    Ok(Json(StatusResponse {
        environment: state.storage.config.environment.clone(),
        registered_sources: registered,
        sync_in_progress: state.run_lock.try_lock().is_err(),
        last_runs,
    }))
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
