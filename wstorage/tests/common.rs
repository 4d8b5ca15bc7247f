use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::json;
use wstorage::{
    catalog::Catalog,
    config::SyncSettings,
    errors::{Result, StorageError},
    fetch::{RemoteSource, Token},
    models::{DateWindow, NormalizedRow, RawRecord},
    schema_registry::{DateEncoding, LIBCAL},
    sync::{Clock, WarehouseSynchronizer},
    warehouse::{SqliteWarehouse, Warehouse},
};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub struct SettableClock(Mutex<NaiveDate>);

impl SettableClock {
    pub fn new(today: NaiveDate) -> Self {
        Self(Mutex::new(today))
    }

    #[allow(dead_code)]
    pub fn set(&self, today: NaiveDate) {
        *self.0.lock().unwrap() = today;
    }
}

impl Clock for SettableClock {
    fn today(&self) -> NaiveDate {
        *self.0.lock().unwrap()
    }
}

/// SQLite warehouse that counts DDL calls and can be told to refuse inserts.
pub struct ObservedWarehouse {
    inner: SqliteWarehouse,
    pub create_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
    pub fail_inserts: AtomicBool,
}

impl ObservedWarehouse {
    pub fn new() -> Self {
        Self {
            inner: SqliteWarehouse::in_memory().unwrap(),
            create_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
        }
    }
}

impl Warehouse for ObservedWarehouse {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.inner.table_exists(table)
    }

    fn create_table(&self, table: &str, fields: &[&str]) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_table(table, fields)
    }

    fn max_value(&self, table: &str, column: &str) -> Result<Option<String>> {
        self.inner.max_value(table, column)
    }

    fn bulk_insert(&self, table: &str, fields: &[&str], rows: &[NormalizedRow]) -> Result<usize> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Warehouse("connection reset by peer".to_string()));
        }
        self.inner.bulk_insert(table, fields, rows)
    }

    fn row_count(&self, table: &str) -> Result<i64> {
        self.inner.row_count(table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCall {
    pub window: DateWindow,
    pub page: u32,
    pub limit: u32,
}

/// LibCal-shaped upstream serving an in-memory list of bookings.
pub struct FakeLibCal {
    bookings: Mutex<Vec<RawRecord>>,
    pub calls: Mutex<Vec<PageCall>>,
    pub deny_token: AtomicBool,
    pub fail_status: Mutex<Option<u16>>,
}

impl FakeLibCal {
    pub fn new() -> Self {
        Self {
            bookings: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            deny_token: AtomicBool::new(false),
            fail_status: Mutex::new(None),
        }
    }

    pub fn add_booking(&self, book_id: &str, from_date: &str) {
        let record = json!({
            "bookId": book_id,
            "eid": 1001,
            "location_name": "State Library",
            "category_name": "Study rooms",
            "item_name": "Room 3",
            "status": "Confirmed",
            "fromDate": from_date,
            "toDate": from_date,
            "created": from_date,
            "check_in_code": "ignored",
        });
        self.bookings
            .lock()
            .unwrap()
            .push(record.as_object().cloned().unwrap());
    }

    /// One booking at 10:00 local time for every day in `[first, last]`.
    pub fn add_daily_bookings(&self, first: NaiveDate, last: NaiveDate) {
        let mut d = first;
        while d <= last {
            self.add_booking(&format!("cs_{d}"), &format!("{d}T10:00:00+10:00"));
            d += Duration::days(1);
        }
    }

    pub fn add_raw(&self, record: serde_json::Value) {
        self.bookings
            .lock()
            .unwrap()
            .push(record.as_object().cloned().unwrap());
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls issued while draining windows, as opposed to ceiling probes.
    pub fn window_calls(&self) -> Vec<PageCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.limit > 1)
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl RemoteSource for FakeLibCal {
    fn name(&self) -> &'static str {
        "libcal"
    }

    async fn get_token(&self) -> Result<Option<Token>> {
        if self.deny_token.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Token::new("fake-token")))
    }

    async fn fetch_page(
        &self,
        _token: &Token,
        window: &DateWindow,
        page: u32,
        limit: u32,
    ) -> Result<Vec<RawRecord>> {
        self.calls.lock().unwrap().push(PageCall {
            window: *window,
            page,
            limit,
        });
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(StorageError::Remote {
                status,
                body: "upstream unavailable".to_string(),
            });
        }
        let bookings = self.bookings.lock().unwrap();
        let in_window: Vec<RawRecord> = bookings
            .iter()
            .filter(|record| {
                let raw = record.get("fromDate").and_then(|v| v.as_str()).unwrap_or("");
                match DateEncoding::OffsetDateTime.parse(raw) {
                    Ok(date) => date >= window.start && date <= window.end(),
                    // Malformed dates are served as-is for the whole range.
                    Err(_) => true,
                }
            })
            .cloned()
            .collect();
        let skip = ((page - 1) * limit) as usize;
        Ok(in_window.into_iter().skip(skip).take(limit as usize).collect())
    }
}

#[allow(dead_code)]
pub struct TestContext {
    pub sync: WarehouseSynchronizer,
    pub warehouse: Arc<ObservedWarehouse>,
    pub catalog: Arc<Catalog>,
    pub upstream: Arc<FakeLibCal>,
    pub clock: Arc<SettableClock>,
    pub table: String,
}

pub fn init_test_context(today: NaiveDate) -> anyhow::Result<TestContext> {
    let _ = env_logger::builder().is_test(true).try_init();

    let catalog = Arc::new(Catalog::in_memory()?);
    catalog.initialize_schema()?;
    let warehouse = Arc::new(ObservedWarehouse::new());
    let clock = Arc::new(SettableClock::new(today));
    let upstream = Arc::new(FakeLibCal::new());

    let sync = WarehouseSynchronizer::new(
        Arc::clone(&catalog),
        warehouse.clone(),
        SyncSettings::default(),
        Some("stg".to_string()),
        clock.clone(),
    );
    wstorage::sync::DataSynchronizer::register_source(&sync, upstream.clone())?;

    Ok(TestContext {
        sync,
        warehouse,
        catalog,
        upstream,
        clock,
        table: LIBCAL.table_name(Some("stg")),
    })
}
