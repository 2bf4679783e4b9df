/// HTTP query interface over the stored records
///
/// Mirrors the device's own `/json` endpoint so that consumers can point at
/// either the device or this proxy.
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::TryStreamExt;
use log::{error, info};
use serde_json::json;

use crate::database::{Store, StoreError};
use crate::models::{Reading, RecordType};

/// Arguments of `/fetch-archive-records`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub since_ts: i64,
    pub max_ts: Option<i64>,
    pub limit: Option<i64>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn storage_failure(e: StoreError) -> Response {
    error!("Query failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Storage failure: {}", e))
}

fn integer_arg(args: &HashMap<&str, &str>, name: &str) -> Result<Option<i64>, String> {
    match args.get(name) {
        Some(value) => value.parse().map(Some).map_err(|_| {
            format!("The {} argument must be an integer, found: '{}'.", name, value)
        }),
        None => Ok(None),
    }
}

/// Parse `since_ts=N[,max_ts=M][,limit=L]`
///
/// Arguments may be separated by `,` or `&`; pieces without a key are ignored.
pub fn parse_archive_args(query: Option<&str>) -> Result<ArchiveQuery, String> {
    let args: HashMap<&str, &str> = query
        .unwrap_or("")
        .split(|c: char| c == ',' || c == '&')
        .filter_map(|arg| arg.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .collect();

    let since_ts = integer_arg(&args, "since_ts")?
        .ok_or_else(|| "fetch-archive-records requires since_ts argument".to_string())?;
    let max_ts = integer_arg(&args, "max_ts")?;
    let limit = integer_arg(&args, "limit")?;
    if limit.map_or(false, |l| l < 0) {
        return Err("The limit argument must not be negative.".to_string());
    }

    Ok(ArchiveQuery {
        since_ts,
        max_ts,
        limit,
    })
}

async fn latest(store: &Store, record_type: RecordType) -> Response {
    match store.fetch_latest(record_type).await {
        Ok(Some(reading)) => Json(reading).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn fetch_current_record(State(store): State<Arc<Store>>) -> Response {
    latest(&store, RecordType::Current).await
}

async fn fetch_two_minute_record(State(store): State<Arc<Store>>) -> Response {
    latest(&store, RecordType::TwoMinute).await
}

async fn fetch_archive_records(
    State(store): State<Arc<Store>>,
    RawQuery(query): RawQuery,
) -> Response {
    let args = match parse_archive_args(query.as_deref()) {
        Ok(args) => args,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let readings: Result<Vec<Reading>, StoreError> = match store
        .fetch(RecordType::Archive, args.since_ts, args.max_ts, args.limit)
        .await
    {
        Ok(stream) => stream.try_collect().await,
        Err(e) => Err(e),
    };

    match readings {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn get_earliest_timestamp(State(store): State<Arc<Store>>) -> Response {
    match store.earliest_timestamp(RecordType::Archive).await {
        Ok(Some(ts)) => Json(json!({ "timestamp": ts })).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn unknown_command(uri: Uri) -> Response {
    match uri.path() {
        "/" => error_response(StatusCode::BAD_REQUEST, "A command must be specified."),
        path => error_response(StatusCode::NOT_FOUND, format!("Unknown command: {}.", path)),
    }
}

pub fn routes(store: Arc<Store>) -> Router {
    Router::new()
        // /json is the device's own endpoint
        .route("/json", get(fetch_current_record))
        .route("/fetch-current-record", get(fetch_current_record))
        .route("/fetch-two-minute-record", get(fetch_two_minute_record))
        .route("/fetch-archive-records", get(fetch_archive_records))
        .route("/get-earliest-timestamp", get(get_earliest_timestamp))
        .fallback(unknown_command)
        .with_state(store)
}

/// Serve queries on `port` until the process exits
pub async fn serve(port: u16, store: Arc<Store>) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Serving queries on port {}", port);
    axum::serve(listener, routes(store)).await
}
