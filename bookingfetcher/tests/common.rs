//! Local stand-in for the LibCal and Vemcount HTTP APIs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::oneshot};

pub const LIBCAL_SECRET: &str = "s3cret";
pub const VEMCOUNT_KEY: &str = "vem-key";

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

#[derive(Default)]
pub struct UpstreamState {
    pub bookings: Mutex<Vec<Value>>,
    pub libcal_tokens_issued: AtomicUsize,
    pub expire_next_page: AtomicBool,
    pub booking_queries: Mutex<Vec<HashMap<String, String>>>,
    /// Last day with foot-traffic observations, if any.
    pub vemcount_last_day: Mutex<Option<NaiveDate>>,
    /// Zones whose sensors report nothing.
    pub vemcount_offline_zones: Mutex<Vec<String>>,
    pub location_requests: AtomicUsize,
    pub report_queries: Mutex<Vec<HashMap<String, String>>>,
}

impl UpstreamState {
    #[allow(dead_code)]
    pub fn add_daily_bookings(&self, first: NaiveDate, last: NaiveDate, per_day: usize) {
        let mut bookings = self.bookings.lock().unwrap();
        let mut d = first;
        while d <= last {
            for slot in 0..per_day {
                let from = format!("{d}T{:02}:00:00+11:00", 9 + slot % 8);
                bookings.push(json!({
                    "bookId": format!("cs_{d}_{slot}"),
                    "eid": 3001,
                    "location_name": "State Library Victoria",
                    "category_name": "Study rooms",
                    "item_name": format!("Room {}", slot % 4),
                    "status": "Confirmed",
                    "fromDate": from,
                    "toDate": from,
                    "created": "2019-12-01T08:00:00+11:00",
                    "email": "patron@example.org",
                }));
            }
            d += Duration::days(1);
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "invalid token").into_response()
}

async fn libcal_token(State(state): State<Arc<UpstreamState>>, Json(body): Json<Value>) -> Response {
    if body["grant_type"] != "client_credentials" || body["client_secret"] != LIBCAL_SECRET {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }
    let n = state.libcal_tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"access_token": format!("libcal-{n}"), "expires_in": 3600})).into_response()
}

async fn libcal_bookings(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !bearer(&headers).is_some_and(|t| t.starts_with("libcal-")) {
        return unauthorized();
    }
    if state.expire_next_page.swap(false, Ordering::SeqCst) {
        return unauthorized();
    }
    state.booking_queries.lock().unwrap().push(query.clone());

    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(1);
    let Some(start) = query
        .get("date")
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    else {
        return (StatusCode::BAD_REQUEST, "date is required").into_response();
    };
    let end = start + Duration::days(parse("days") - 1);
    let limit = parse("limit") as usize;
    let page = parse("page") as usize;

    let bookings = state.bookings.lock().unwrap();
    let matching: Vec<Value> = bookings
        .iter()
        .filter(|b| {
            let from = b["fromDate"].as_str().unwrap_or_default();
            NaiveDate::parse_from_str(from.get(..10).unwrap_or_default(), "%Y-%m-%d")
                .map(|d| d >= start && d <= end)
                .unwrap_or(false)
        })
        .skip((page - 1) * limit)
        .take(limit)
        .cloned()
        .collect();
    Json(Value::Array(matching)).into_response()
}

async fn libcal_locations(headers: HeaderMap) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    Json(json!([
        {"lid": 1, "name": "State Library Victoria", "public": 1},
        {"lid": 2, "name": "Staff Rooms", "public": 0}
    ]))
    .into_response()
}

async fn vemcount_login(headers: HeaderMap) -> Response {
    match headers.get("api-key").and_then(|v| v.to_str().ok()) {
        Some(VEMCOUNT_KEY) => Json(json!({"access_token": "vem-token"})).into_response(),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad key"}))).into_response(),
    }
}

async fn vemcount_location(State(state): State<Arc<UpstreamState>>, headers: HeaderMap) -> Response {
    if bearer(&headers) != Some("vem-token") {
        return unauthorized();
    }
    state.location_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "data": [{
            "id": 7,
            "name": "Swanston St",
            "zones": {"data": [{"id": 11, "name": "Foyer"}, {"id": 12, "name": "Dome"}]}
        }]
    }))
    .into_response()
}

async fn vemcount_report(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if bearer(&headers) != Some("vem-token") {
        return unauthorized();
    }
    state.report_queries.lock().unwrap().push(query.clone());
    let zone = query.get("data").cloned().unwrap_or_default();
    let date = |key: &str| {
        query
            .get(key)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    };
    let (Some(from), Some(to)) = (date("form_date_from"), date("form_date_to")) else {
        return (StatusCode::BAD_REQUEST, "dates are required").into_response();
    };
    let last = *state.vemcount_last_day.lock().unwrap();
    let offline = state.vemcount_offline_zones.lock().unwrap().contains(&zone);

    let slots: &[&str] = if zone == "11" {
        &["09:00:00", "09:30:00"]
    } else {
        &["10:00:00"]
    };
    let mut dates = Map::new();
    let mut d = from;
    while !offline && d <= to && last.is_some_and(|last| d <= last) {
        for slot in slots {
            let dt = format!("{d} {slot}");
            dates.insert(
                dt.clone(),
                json!({"data": {"dt": dt, "count_in": 5, "count_out": 3, "inside": 2}}),
            );
        }
        d += Duration::days(1);
    }
    let mut by_zone = Map::new();
    by_zone.insert(zone, json!({"dates": dates}));
    Json(json!({"yesterday": by_zone})).into_response()
}

/// Fake upstream bound to an ephemeral port, shut down on drop.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    pub state: Arc<UpstreamState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeUpstream {
    pub async fn spawn() -> Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        let state = Arc::new(UpstreamState::default());
        let app = Router::new()
            .route("/oauth/token", post(libcal_token))
            .route("/space/bookings", get(libcal_bookings))
            .route("/space/locations", get(libcal_locations))
            .route("/auth/login", post(vemcount_login))
            .route("/location", get(vemcount_location))
            .route("/report", post(vemcount_report))
            .with_state(state.clone());

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("failed to bind fake upstream")?;
        let addr = listener.local_addr().context("missing local addr")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                log::error!("fake upstream error: {err:?}");
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
