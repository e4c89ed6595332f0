use std::env::{self, VarError};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DbConnectionError;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Settings for the SQLite pool backing the print journal.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConnectionConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout_secs: u64,
}

impl Default for DbConnectionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
        }
    }
}

impl DbConnectionConfig {
    #[inline]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Configuration for a database file on disk.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self::new(format!("sqlite://{}", path.as_ref().display()))
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Apply pool overrides from environment variables using the supplied prefix.
    ///
    /// Recognised variables:
    /// - `{PREFIX}_DB_MAX_CONNECTIONS`
    /// - `{PREFIX}_DB_CONNECT_TIMEOUT_SECS`
    /// - `{PREFIX}_DB_IDLE_TIMEOUT_SECS`
    /// - `{PREFIX}_DB_BUSY_TIMEOUT_SECS`
    pub fn with_env_overrides(mut self, prefix: &str) -> Result<Self, DbConnectionError> {
        if let Some(max) = maybe_parse_env::<u32>(prefix, "DB_MAX_CONNECTIONS")? {
            if max == 0 {
                return Err(DbConnectionError::InvalidSetting {
                    var: format!("{prefix}_DB_MAX_CONNECTIONS"),
                    reason: "max_connections must be greater than 0".to_owned(),
                });
            }
            self.max_connections = max;
        }
        if let Some(secs) = maybe_parse_env::<u64>(prefix, "DB_CONNECT_TIMEOUT_SECS")? {
            self.connect_timeout_secs = secs;
        }
        if let Some(secs) = maybe_parse_env::<u64>(prefix, "DB_IDLE_TIMEOUT_SECS")? {
            self.idle_timeout_secs = Some(secs);
        }
        if let Some(secs) = maybe_parse_env::<u64>(prefix, "DB_BUSY_TIMEOUT_SECS")? {
            self.busy_timeout_secs = secs;
        }
        Ok(self)
    }

    #[inline]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[inline]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    #[inline]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

fn maybe_parse_env<T>(prefix: &str, suffix: &str) -> Result<Option<T>, DbConnectionError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    let var_name = format!("{prefix}_{suffix}");
    match env::var(&var_name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse::<T>()
                    .map(Some)
                    .map_err(|source| DbConnectionError::InvalidNumber {
                        var: var_name,
                        source,
                    })
            }
        }
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(DbConnectionError::InvalidUnicode(var_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_turned_into_sqlite_url() {
        let cfg = DbConnectionConfig::for_path("/var/lib/printagent/prints.db");
        assert_eq!(cfg.url, "sqlite:///var/lib/printagent/prints.db");
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn env_overrides_are_read_with_prefix() {
        // Unique prefix so parallel tests never see these variables.
        std::env::set_var("PA_DBCFG_TEST_DB_BUSY_TIMEOUT_SECS", "9");
        std::env::set_var("PA_DBCFG_TEST_DB_IDLE_TIMEOUT_SECS", "");
        let cfg = DbConnectionConfig::in_memory()
            .with_env_overrides("PA_DBCFG_TEST")
            .unwrap();
        assert_eq!(cfg.busy_timeout(), Duration::from_secs(9));
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_connections_rejected() {
        std::env::set_var("PA_DBCFG_ZERO_DB_MAX_CONNECTIONS", "0");
        let err = DbConnectionConfig::in_memory()
            .with_env_overrides("PA_DBCFG_ZERO")
            .unwrap_err();
        assert!(matches!(err, DbConnectionError::InvalidSetting { .. }));
    }
}
