/// HTTP polling of the PurpleAir device
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::{sleep, Duration};
use url::Url;

use crate::device::schema::{parse_reading, SchemaError};
use crate::models::Reading;

// Connection failures right after boot are usually name resolution not being
// up yet, so they get a couple of retries
const MAX_CONNECT_RETRIES: usize = 2;
const WAIT_BETWEEN_RETRIES: u64 = 5;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("invalid device address: {0}")]
    Address(#[from] url::ParseError),

    #[error("request to device failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device response is not a JSON object")]
    NotAnObject,

    #[error("malformed device response: {0}")]
    Malformed(#[from] SchemaError),
}

impl CollectError {
    /// Whether the failure happened while connecting, before any response
    pub fn is_connect(&self) -> bool {
        matches!(self, CollectError::Http(e) if e.is_connect())
    }
}

/// Where readings come from
#[async_trait]
pub trait ReadingSource: Send {
    /// One attempt at fetching a reading
    async fn fetch_reading(&mut self) -> Result<Reading, CollectError>;

    /// Fetch a reading, retrying connection-level failures a bounded number
    /// of times with a fixed backoff
    async fn fetch_reading_with_retry(&mut self) -> Result<Reading, CollectError> {
        let mut attempt = 0;
        loop {
            match self.fetch_reading().await {
                Err(e) if e.is_connect() && attempt < MAX_CONNECT_RETRIES => {
                    attempt += 1;
                    info!("{}: Retrying request ({} of {}).", e, attempt, MAX_CONNECT_RETRIES);
                    sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES)).await;
                }
                result => return result,
            }
        }
    }
}

/// Client for a device's `/json?live=true` endpoint
///
/// The underlying HTTP client is kept between polls so the connection can be
/// reused, and is thrown away after any failure so the next poll starts over.
pub struct DeviceClient {
    url: Url,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl DeviceClient {
    pub fn new(hostname: &str, port: u16, timeout: Duration) -> Result<Self, CollectError> {
        let mut url = Url::parse(&format!("http://{}:{}/json", hostname, port))?;
        url.set_query(Some("live=true"));
        Ok(DeviceClient {
            url,
            timeout,
            client: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn client(&mut self) -> Result<reqwest::Client, CollectError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    async fn request(&mut self) -> Result<Reading, CollectError> {
        let body: Value = self
            .client()?
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let object: &Map<String, Value> = body.as_object().ok_or(CollectError::NotAnObject)?;
        Ok(parse_reading(object)?)
    }
}

#[async_trait]
impl ReadingSource for DeviceClient {
    async fn fetch_reading(&mut self) -> Result<Reading, CollectError> {
        let result = self.request().await;
        if let Err(e) = &result {
            debug!("Dropping device connection after error: {}", e);
            self.client = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_live_json_url() {
        let client = DeviceClient::new("purpleair.local", 8080, Duration::from_secs(15)).unwrap();
        assert_eq!(client.url().as_str(), "http://purpleair.local:8080/json?live=true");
    }

    #[test]
    fn rejects_unusable_hostname() {
        assert!(DeviceClient::new("bad host name", 80, Duration::from_secs(15)).is_err());
    }

    #[test]
    fn schema_errors_are_not_connection_errors() {
        let err = CollectError::from(SchemaError::MissingField("pressure".into()));
        assert!(!err.is_connect());
        assert!(!CollectError::NotAnObject.is_connect());
    }

    #[tokio::test]
    async fn unreachable_device_fails_without_panicking() {
        // Port 9 on localhost is not expected to be listening
        let mut client = DeviceClient::new("127.0.0.1", 9, Duration::from_secs(2)).unwrap();
        let err = client.fetch_reading().await.unwrap_err();
        assert!(err.is_connect(), "{}", err);
        assert!(client.client.is_none());
    }

    /// Fails every attempt, either while connecting or with a bad response
    struct FailingSource {
        attempts: usize,
        connect_failure: bool,
    }

    #[async_trait]
    impl ReadingSource for FailingSource {
        async fn fetch_reading(&mut self) -> Result<Reading, CollectError> {
            self.attempts += 1;
            if !self.connect_failure {
                return Err(CollectError::NotAnObject);
            }
            // No client timeout, so the paused clock has nothing to skip ahead to
            let e = reqwest::Client::new()
                .get("http://127.0.0.1:9/json")
                .send()
                .await
                .err()
                .unwrap();
            Err(CollectError::Http(e))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_are_retried_twice_with_a_wait() {
        let mut source = FailingSource {
            attempts: 0,
            connect_failure: true,
        };
        let started = tokio::time::Instant::now();

        let err = source.fetch_reading_with_retry().await.unwrap_err();

        assert!(err.is_connect());
        assert_eq!(source.attempts, 1 + MAX_CONNECT_RETRIES);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_responses_are_not_retried() {
        let mut source = FailingSource {
            attempts: 0,
            connect_failure: false,
        };
        let started = tokio::time::Instant::now();

        let err = source.fetch_reading_with_retry().await.unwrap_err();

        assert!(matches!(err, CollectError::NotAnObject));
        assert_eq!(source.attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
