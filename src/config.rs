use std::env;

use thiserror::Error;

use crate::database::is_valid_identifier;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{key} must be {expected}, found '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("ARCHIVE_INTERVAL_SECS ({archive}) must be a multiple of POLL_FREQ_SECS ({poll})")]
    ArchiveNotMultipleOfPoll { archive: i64, poll: i64 },

    #[error("POLL_FREQ_OFFSET ({offset}) must be at least 0 and less than POLL_FREQ_SECS ({poll})")]
    OffsetOutOfRange { offset: i64, poll: i64 },

    #[error("DATABASE_SCHEMA '{0}' may only contain letters, digits and underscores")]
    InvalidSchema(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub service_name: String,
    pub hostname: String,
    pub port: u16,
    pub server_port: u16,
    pub timeout_secs: u64,
    pub poll_freq_secs: i64,
    pub poll_freq_offset: i64,
    pub archive_interval_secs: i64,
    pub database_url: String,
    pub database_schema: String,
    pub debug: bool,
    pub log_to_stdout: bool,
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value,
        }),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            expected: "0 or 1",
            value: other.to_string(),
        }),
    }
}

impl ProxyConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a key, or None if it is unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hostname = lookup("PURPLEAIR_HOSTNAME")
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::Missing("PURPLEAIR_HOSTNAME"))?;
        let database_url = lookup("DATABASE_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let port = parse_or(&lookup, "PURPLEAIR_PORT", "a port number", 80)?;
        let server_port = parse_or(&lookup, "SERVER_PORT", "a port number", 8000)?;
        let timeout_secs = parse_or(&lookup, "TIMEOUT_SECS", "a whole number of seconds", 15)?;
        let poll_freq_secs: i64 = parse_or(&lookup, "POLL_FREQ_SECS", "a whole number of seconds", 30)?;
        let poll_freq_offset: i64 = parse_or(&lookup, "POLL_FREQ_OFFSET", "a whole number of seconds", 0)?;
        let archive_interval_secs: i64 =
            parse_or(&lookup, "ARCHIVE_INTERVAL_SECS", "a whole number of seconds", 300)?;

        if poll_freq_secs <= 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_FREQ_SECS",
                expected: "positive",
                value: poll_freq_secs.to_string(),
            });
        }
        if archive_interval_secs <= 0 || archive_interval_secs % poll_freq_secs != 0 {
            return Err(ConfigError::ArchiveNotMultipleOfPoll {
                archive: archive_interval_secs,
                poll: poll_freq_secs,
            });
        }
        if !(0..poll_freq_secs).contains(&poll_freq_offset) {
            return Err(ConfigError::OffsetOutOfRange {
                offset: poll_freq_offset,
                poll: poll_freq_secs,
            });
        }

        let database_schema = lookup("DATABASE_SCHEMA").unwrap_or_else(|| "public".to_string());
        if !is_valid_identifier(&database_schema) {
            return Err(ConfigError::InvalidSchema(database_schema));
        }

        Ok(ProxyConfig {
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| "purple-proxy".to_string()),
            hostname,
            port,
            server_port,
            timeout_secs,
            poll_freq_secs,
            poll_freq_offset,
            archive_interval_secs,
            database_url,
            database_schema,
            debug: flag(&lookup, "DEBUG")?,
            log_to_stdout: flag(&lookup, "LOG_TO_STDOUT")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ProxyConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProxyConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("PURPLEAIR_HOSTNAME", "purpleair.local"),
        ("DATABASE_URL", "postgres://proxy@localhost/purple"),
    ];

    fn with_required(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        REQUIRED.iter().chain(extra).copied().collect()
    }

    #[test]
    fn applies_defaults() {
        let config = config_from(&REQUIRED).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.poll_freq_secs, 30);
        assert_eq!(config.poll_freq_offset, 0);
        assert_eq!(config.archive_interval_secs, 300);
        assert_eq!(config.database_schema, "public");
        assert_eq!(config.service_name, "purple-proxy");
        assert!(!config.debug);
        assert!(!config.log_to_stdout);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&with_required(&[
            ("PURPLEAIR_PORT", "8080"),
            ("POLL_FREQ_SECS", "15"),
            ("POLL_FREQ_OFFSET", "5"),
            ("ARCHIVE_INTERVAL_SECS", "60"),
            ("DATABASE_SCHEMA", "purple"),
            ("DEBUG", "1"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.poll_freq_secs, 15);
        assert_eq!(config.poll_freq_offset, 5);
        assert_eq!(config.archive_interval_secs, 60);
        assert_eq!(config.database_schema, "purple");
        assert!(config.debug);
    }

    #[test]
    fn requires_hostname_and_database() {
        assert_eq!(
            config_from(&[("DATABASE_URL", "postgres://localhost/purple")]),
            Err(ConfigError::Missing("PURPLEAIR_HOSTNAME"))
        );
        assert_eq!(
            config_from(&[("PURPLEAIR_HOSTNAME", "purpleair.local")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn archive_interval_must_be_multiple_of_poll() {
        assert_eq!(
            config_from(&with_required(&[("ARCHIVE_INTERVAL_SECS", "100")])),
            Err(ConfigError::ArchiveNotMultipleOfPoll {
                archive: 100,
                poll: 30
            })
        );
    }

    #[test]
    fn offset_must_be_within_poll_period() {
        assert!(matches!(
            config_from(&with_required(&[("POLL_FREQ_OFFSET", "30")])),
            Err(ConfigError::OffsetOutOfRange { .. })
        ));
        assert!(matches!(
            config_from(&with_required(&[("POLL_FREQ_OFFSET", "-1")])),
            Err(ConfigError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_garbage_values() {
        assert!(matches!(
            config_from(&with_required(&[("PURPLEAIR_PORT", "eighty")])),
            Err(ConfigError::Invalid { key: "PURPLEAIR_PORT", .. })
        ));
        assert!(matches!(
            config_from(&with_required(&[("DEBUG", "maybe")])),
            Err(ConfigError::Invalid { key: "DEBUG", .. })
        ));
        assert_eq!(
            config_from(&with_required(&[("DATABASE_SCHEMA", "purple air")])),
            Err(ConfigError::InvalidSchema("purple air".to_string()))
        );
    }
}
