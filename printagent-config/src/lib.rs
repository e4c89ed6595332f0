//! Layered configuration for the print agent.
//!
//! Values are resolved in this order, later layers winning:
//! built-in defaults, an optional config file (TOML, YAML or JSON),
//! the persisted settings store (see [`settings`]), then `PRINTAGENT_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod paths;
pub mod settings;

pub use settings::{
    AgentSettings, FileSettings, MemorySettings, SettingKey, SettingsProvider,
};

pub const DEFAULT_SERVER_URL: &str = "https://colemanbros.co.uk";
pub const DEFAULT_PRINTER: &str = r"\\office-02\ZPL500";

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub printer: Option<PrinterSection>,
    #[serde(default)]
    pub connection: Option<ConnectionSection>,
    #[serde(default)]
    pub dedupe: Option<DedupeSection>,
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub reload: Option<ReloadSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrinterSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub serialize: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default)]
    pub reconnect_interval_secs: Option<u64>,
    #[serde(default)]
    pub reconnect_max_interval_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub missing_request_cooldown_ms: Option<u64>,
    #[serde(default)]
    pub ack_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DedupeSection {
    #[serde(default)]
    pub fingerprint_window_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReloadSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("unknown setting key: {0}")]
    UnknownKey(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn. JSON goes first since it is the strictest.
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    Err(ConfigError::Parse(
        "failed to parse config as any supported format".into(),
    ))
}

/// Concrete agent configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub printer: PrinterConfig,
    pub connection: ConnectionConfig,
    pub dedupe: DedupeConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub reload: ReloadConfig,
}

#[derive(Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterConfig {
    pub name: String,
    /// One of `auto`, `spooler`, `tcp` or `dry-run`.
    pub backend: String,
    pub timeout_secs: u64,
    /// Funnel every print call through a single slot.
    pub serialize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionConfig {
    pub reconnect_interval_secs: u64,
    pub reconnect_max_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub missing_request_cooldown_ms: u64,
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupeConfig {
    pub fingerprint_window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: DEFAULT_SERVER_URL.to_string(),
                api_key: None,
            },
            printer: PrinterConfig {
                name: DEFAULT_PRINTER.to_string(),
                backend: "auto".to_string(),
                timeout_secs: 30,
                serialize: true,
            },
            connection: ConnectionConfig {
                reconnect_interval_secs: 5,
                reconnect_max_interval_secs: 5,
                connect_timeout_secs: 10,
                missing_request_cooldown_ms: 2000,
                ack_timeout_secs: 5,
            },
            dedupe: DedupeConfig {
                fingerprint_window_secs: 60,
            },
            database: DatabaseConfig { path: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            reload: ReloadConfig {
                enabled: true,
                interval_secs: 10,
            },
        }
    }
}

impl Config {
    /// Location of the print journal, falling back to the per-user data directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(p) => PathBuf::from(p),
            None => paths::data_dir().join(paths::DATABASE_FILE),
        }
    }

    #[inline]
    pub const fn fingerprint_window(&self) -> Duration {
        Duration::from_secs(self.dedupe.fingerprint_window_secs)
    }

    #[inline]
    pub const fn print_timeout(&self) -> Duration {
        Duration::from_secs(self.printer.timeout_secs)
    }

    #[inline]
    pub const fn missing_request_cooldown(&self) -> Duration {
        Duration::from_millis(self.connection.missing_request_cooldown_ms)
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(()),
    }
}

/// Treat blank strings as absent.
#[inline]
fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from an optional file and environment variables.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    load_layered(path, None)
}

/// Load `Config` from defaults, an optional file, the settings store and the environment.
pub fn load_layered<P: AsRef<Path>>(
    path: Option<P>,
    settings: Option<&dyn SettingsProvider>,
) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        apply_raw(&mut cfg, raw);
    }

    if let Some(store) = settings {
        apply_settings(&mut cfg, store);
    }

    apply_env_overrides(&mut cfg, |key| env::var(key).ok())?;

    Ok(cfg)
}

fn apply_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(server) = raw.server {
        apply_opt!(cfg.server.url, non_blank(server.url));
        apply_opt!(cfg.server.api_key, non_blank(server.api_key), wrap);
    }
    if let Some(printer) = raw.printer {
        apply_opt!(cfg.printer.name, non_blank(printer.name));
        apply_opt!(cfg.printer.backend, non_blank(printer.backend));
        apply_opt!(cfg.printer.timeout_secs, printer.timeout_secs);
        apply_opt!(cfg.printer.serialize, printer.serialize);
    }
    if let Some(c) = raw.connection {
        apply_opt!(cfg.connection.reconnect_interval_secs, c.reconnect_interval_secs);
        apply_opt!(
            cfg.connection.reconnect_max_interval_secs,
            c.reconnect_max_interval_secs
        );
        apply_opt!(cfg.connection.connect_timeout_secs, c.connect_timeout_secs);
        apply_opt!(
            cfg.connection.missing_request_cooldown_ms,
            c.missing_request_cooldown_ms
        );
        apply_opt!(cfg.connection.ack_timeout_secs, c.ack_timeout_secs);
    }
    if let Some(d) = raw.dedupe {
        apply_opt!(cfg.dedupe.fingerprint_window_secs, d.fingerprint_window_secs);
    }
    if let Some(db) = raw.database {
        apply_opt!(cfg.database.path, non_blank(db.path), wrap);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, non_blank(logging.level));
        apply_opt!(cfg.logging.json, logging.json);
    }
    if let Some(r) = raw.reload {
        apply_opt!(cfg.reload.enabled, r.enabled);
        apply_opt!(cfg.reload.interval_secs, r.interval_secs);
    }
}

/// Overlay the values a user stored through the settings provider.
pub fn apply_settings(cfg: &mut Config, store: &dyn SettingsProvider) {
    apply_opt!(cfg.server.api_key, non_blank(store.get(SettingKey::ApiKey)), wrap);
    apply_opt!(cfg.server.url, non_blank(store.get(SettingKey::ServerUrl)));
    apply_opt!(cfg.printer.name, non_blank(store.get(SettingKey::PrinterName)));
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        None => Ok(None),
    }
}

fn env_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        None => Ok(None),
    }
}

/// Apply all `PRINTAGENT_*` overrides using the supplied variable lookup.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_str = |key: &str| non_blank(lookup(key));

    // Server
    apply_opt!(cfg.server.url, env_str("PRINTAGENT_SERVER_URL"));
    apply_opt!(cfg.server.api_key, env_str("PRINTAGENT_API_KEY"), wrap);

    // Printer
    apply_opt!(cfg.printer.name, env_str("PRINTAGENT_PRINTER_NAME"));
    apply_opt!(cfg.printer.backend, env_str("PRINTAGENT_PRINTER_BACKEND"));
    apply_opt!(
        cfg.printer.timeout_secs,
        env_parse(&lookup, "PRINTAGENT_PRINTER_TIMEOUT_SECS")?
    );
    apply_opt!(
        cfg.printer.serialize,
        env_bool(&lookup, "PRINTAGENT_PRINTER_SERIALIZE")?
    );

    // Connection
    apply_opt!(
        cfg.connection.reconnect_interval_secs,
        env_parse(&lookup, "PRINTAGENT_RECONNECT_INTERVAL_SECS")?
    );
    apply_opt!(
        cfg.connection.reconnect_max_interval_secs,
        env_parse(&lookup, "PRINTAGENT_RECONNECT_MAX_INTERVAL_SECS")?
    );
    apply_opt!(
        cfg.connection.connect_timeout_secs,
        env_parse(&lookup, "PRINTAGENT_CONNECT_TIMEOUT_SECS")?
    );
    apply_opt!(
        cfg.connection.missing_request_cooldown_ms,
        env_parse(&lookup, "PRINTAGENT_MISSING_COOLDOWN_MS")?
    );
    apply_opt!(
        cfg.connection.ack_timeout_secs,
        env_parse(&lookup, "PRINTAGENT_ACK_TIMEOUT_SECS")?
    );

    // Dedupe
    apply_opt!(
        cfg.dedupe.fingerprint_window_secs,
        env_parse(&lookup, "PRINTAGENT_FINGERPRINT_WINDOW_SECS")?
    );

    // Database
    apply_opt!(cfg.database.path, env_str("PRINTAGENT_DATABASE_PATH"), wrap);

    // Logging
    apply_opt!(cfg.logging.level, env_str("PRINTAGENT_LOG_LEVEL"));
    apply_opt!(cfg.logging.json, env_bool(&lookup, "PRINTAGENT_LOG_JSON")?);

    // Reload
    apply_opt!(cfg.reload.enabled, env_bool(&lookup, "PRINTAGENT_RELOAD_ENABLED")?);
    apply_opt!(
        cfg.reload.interval_secs,
        env_parse(&lookup, "PRINTAGENT_RELOAD_INTERVAL_SECS")?
    );

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
///
/// A missing API key is allowed: the agent then stays disconnected until one
/// is supplied.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    match url::Url::parse(&cfg.server.url) {
        Ok(u) => {
            if !matches!(u.scheme(), "http" | "https" | "ws" | "wss") {
                return Err(ConfigError::Validation(format!(
                    "server.url must be http, https, ws or wss: {}",
                    cfg.server.url
                )));
            }
            if u.host_str().map(str::is_empty).unwrap_or(true) {
                return Err(ConfigError::Validation(format!(
                    "server.url has no host: {}",
                    cfg.server.url
                )));
            }
        }
        Err(e) => {
            return Err(ConfigError::Validation(format!(
                "invalid server.url {}: {}",
                cfg.server.url, e
            )))
        }
    }

    if cfg.printer.name.trim().is_empty() {
        return Err(ConfigError::Validation("printer.name must be set".into()));
    }
    match cfg.printer.backend.as_str() {
        "auto" | "spooler" | "tcp" | "dry-run" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "unsupported printer.backend: {}",
                other
            )))
        }
    }
    if cfg.printer.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "printer.timeout_secs must be > 0".into(),
        ));
    }

    let c = &cfg.connection;
    if c.reconnect_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "connection.reconnect_interval_secs must be > 0".into(),
        ));
    }
    if c.reconnect_max_interval_secs < c.reconnect_interval_secs {
        return Err(ConfigError::Validation(
            "connection.reconnect_max_interval_secs must not be below reconnect_interval_secs"
                .into(),
        ));
    }
    if c.connect_timeout_secs == 0 || c.ack_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "connection timeouts must be > 0".into(),
        ));
    }

    if cfg.dedupe.fingerprint_window_secs == 0 {
        return Err(ConfigError::Validation(
            "dedupe.fingerprint_window_secs must be > 0".into(),
        ));
    }
    if cfg.reload.enabled && cfg.reload.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "reload.interval_secs must be > 0 when reload is enabled".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_toml() {
        let f = NamedTempFile::with_suffix(".toml").expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
[server]
url = "https://print.example"
api_key = "k-123"

[printer]
name = "tcp://10.0.0.7:9100"
timeout_secs = 12
"#,
        )
        .unwrap();
        let cfg = load_config(Some(f.path())).expect("load");
        assert_eq!(cfg.server.url, "https://print.example");
        assert_eq!(cfg.server.api_key.as_deref(), Some("k-123"));
        assert_eq!(cfg.printer.name, "tcp://10.0.0.7:9100");
        assert_eq!(cfg.printer.timeout_secs, 12);
        // untouched sections keep their defaults
        assert_eq!(cfg.dedupe.fingerprint_window_secs, 60);
        assert_eq!(cfg.connection.reconnect_interval_secs, 5);
    }

    #[test]
    fn parse_yaml() {
        let f = NamedTempFile::with_suffix(".yaml").expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
server:
  url: http://localhost:5000
dedupe:
  fingerprint_window_secs: 90
logging:
  level: debug
  json: true
"#,
        )
        .unwrap();
        let raw = load_raw_from_file(f.path()).expect("load");
        let dedupe = raw.dedupe.expect("dedupe section");
        assert_eq!(dedupe.fingerprint_window_secs, Some(90));
        let logging = raw.logging.expect("logging section");
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert_eq!(logging.json, Some(true));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let vars: HashMap<&str, &str> = [
            ("PRINTAGENT_SERVER_URL", "wss://agent.example"),
            ("PRINTAGENT_API_KEY", "from-env"),
            ("PRINTAGENT_PRINTER_SERIALIZE", "off"),
            ("PRINTAGENT_FINGERPRINT_WINDOW_SECS", "30"),
            ("PRINTAGENT_LOG_JSON", "yes"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.server.api_key = Some("from-file".into());
        apply_env_overrides(&mut cfg, |k| vars.get(k).map(|v| v.to_string())).expect("apply");

        assert_eq!(cfg.server.url, "wss://agent.example");
        assert_eq!(cfg.server.api_key.as_deref(), Some("from-env"));
        assert!(!cfg.printer.serialize);
        assert_eq!(cfg.dedupe.fingerprint_window_secs, 30);
        assert!(cfg.logging.json);
    }

    #[test]
    fn bad_env_number_is_reported() {
        let mut cfg = Config::default();
        let err = apply_env_overrides(&mut cfg, |k| {
            (k == "PRINTAGENT_RECONNECT_INTERVAL_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("PRINTAGENT_RECONNECT_INTERVAL_SECS"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, |k| (k == "PRINTAGENT_API_KEY").then(|| "  ".to_string()))
            .expect("apply");
        assert!(cfg.server.api_key.is_none());
    }

    #[test]
    fn stored_settings_override_file() {
        let store = MemorySettings::new();
        store.set(SettingKey::ApiKey, "stored-key").unwrap();
        store.set(SettingKey::PrinterName, "ZD420").unwrap();

        let mut cfg = Config::default();
        apply_settings(&mut cfg, &store);
        assert_eq!(cfg.server.api_key.as_deref(), Some("stored-key"));
        assert_eq!(cfg.printer.name, "ZD420");
        assert_eq!(cfg.server.url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn validation() {
        assert!(validate_config(&Config::default()).is_ok());

        let mut cfg = Config::default();
        cfg.server.url = "ftp://nope.example".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.printer.backend = "carrier-pigeon".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.dedupe.fingerprint_window_secs = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.connection.reconnect_max_interval_secs = 1;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let mut cfg = Config::default();
        cfg.server.api_key = Some("super-secret".into());
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
    }
}
