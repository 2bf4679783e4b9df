/// PostgreSQL storage for current, two-minute and archive records
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Reading, RecordType};

pub mod connection;
pub mod operations;
pub mod rows;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {}", describe_postgres(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("timed out connecting to database")]
    Timeout,

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("invalid database URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid schema name '{0}'")]
    InvalidSchema(String),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("stored timestamp {0} is out of range")]
    BadTimestamp(i64),
}

// tokio-postgres only prints the error kind, so pull in the server message
// and SQLSTATE or the underlying cause.
fn describe_postgres(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        return format!("{} ({})", db.message(), db.code().code());
    }
    let kind = e.to_string();
    match std::error::Error::source(e) {
        Some(cause) if !kind.contains(&cause.to_string()) => format!("{}: {}", kind, cause),
        _ => kind,
    }
}

/// Whether `name` can be spliced into SQL as an unquoted identifier
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Handle on the record store
///
/// Holds no connection; every operation opens its own session.
#[derive(Debug, Clone)]
pub struct Store {
    database_url: String,
    schema: String,
}

impl Store {
    pub fn new(database_url: &str, schema: &str) -> Result<Self, StoreError> {
        if !is_valid_identifier(schema) {
            return Err(StoreError::InvalidSchema(schema.to_string()));
        }
        Ok(Store {
            database_url: database_url.to_string(),
            schema: schema.to_string(),
        })
    }

    /// Same database, different schema
    pub fn with_schema(&self, schema: &str) -> Result<Self, StoreError> {
        Store::new(&self.database_url, schema)
    }
}

/// Where the sampling loop puts its records
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn save(&self, record_type: RecordType, reading: &Reading) -> Result<(), StoreError>;
}

#[cfg(test)]
static SCHEMA_COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

/// A store in a fresh schema, or None when no test database is configured
#[cfg(test)]
pub async fn test_store() -> Option<Store> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let schema = format!(
        "purple_test_{}_{}",
        std::process::id(),
        SCHEMA_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    );
    let store = Store::new(&url, &schema).unwrap();
    store.create_schema().await.unwrap();
    Some(store)
}
