//! Persisted user settings (API key, printer name, server URL).
//!
//! The store is a small JSON object on disk. Every write goes through a
//! temporary file and a rename so a crash never leaves half a document.

use crate::{Config, ConfigError};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingKey {
    ApiKey,
    PrinterName,
    ServerUrl,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::ApiKey,
        SettingKey::PrinterName,
        SettingKey::ServerUrl,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SettingKey::ApiKey => "api_key",
            SettingKey::PrinterName => "printer_name",
            SettingKey::ServerUrl => "server_url",
        }
    }

    /// Whether the value should be masked when displayed.
    pub const fn is_secret(self) -> bool {
        matches!(self, SettingKey::ApiKey)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "api_key" => Ok(SettingKey::ApiKey),
            "printer_name" | "printer" => Ok(SettingKey::PrinterName),
            "server_url" | "server" => Ok(SettingKey::ServerUrl),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }
}

/// Key/value store for the settings a user can change at runtime.
pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: SettingKey) -> Option<String>;
    fn set(&self, key: SettingKey, value: &str) -> Result<(), ConfigError>;
    fn remove(&self, key: SettingKey) -> Result<(), ConfigError>;
}

/// In-memory provider, used by tests and by callers without a writable data dir.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<SettingKey, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsProvider for MemorySettings {
    fn get(&self, key: SettingKey) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(&key).cloned()
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), ConfigError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: SettingKey) -> Result<(), ConfigError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(&key);
        Ok(())
    }
}

/// JSON-file backed provider.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let cache = match fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => BTreeMap::new(),
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Open the store in the default per-user location.
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(crate::paths::settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(values)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsProvider for FileSettings {
    fn get(&self, key: SettingKey) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key.as_str()).cloned()
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), ConfigError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = cache.clone();
        next.insert(key.as_str().to_string(), value.to_string());
        self.persist(&next)?;
        *cache = next;
        Ok(())
    }

    fn remove(&self, key: SettingKey) -> Result<(), ConfigError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if !cache.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut next = cache.clone();
        next.remove(key.as_str());
        self.persist(&next)?;
        *cache = next;
        Ok(())
    }
}

/// Snapshot of the values the connection and print path need.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub server_url: String,
    pub api_key: Option<String>,
    pub printer_name: String,
}

impl AgentSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            server_url: cfg.server.url.clone(),
            api_key: cfg.server.api_key.clone(),
            printer_name: cfg.printer.name.clone(),
        }
    }

    /// True when a non-empty API key is present.
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

impl fmt::Debug for AgentSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSettings")
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("printer_name", &self.printer_name)
            .finish()
    }
}

/// Mask a secret for display, keeping the last four characters.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_settings_roundtrip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = FileSettings::open(&path).unwrap();
        assert!(store.get(SettingKey::ApiKey).is_none());
        store.set(SettingKey::ApiKey, "abc").unwrap();
        store.set(SettingKey::PrinterName, "ZPL500").unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(reopened.get(SettingKey::ApiKey).as_deref(), Some("abc"));
        assert_eq!(reopened.get(SettingKey::PrinterName).as_deref(), Some("ZPL500"));

        reopened.remove(SettingKey::ApiKey).unwrap();
        let again = FileSettings::open(&path).unwrap();
        assert!(again.get(SettingKey::ApiKey).is_none());
    }

    #[test]
    fn corrupt_settings_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileSettings::open(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn key_parsing() {
        assert_eq!("api-key".parse::<SettingKey>().unwrap(), SettingKey::ApiKey);
        assert_eq!("PRINTER".parse::<SettingKey>().unwrap(), SettingKey::PrinterName);
        assert!("colour".parse::<SettingKey>().is_err());
    }

    #[test]
    fn credential_presence() {
        let mut s = AgentSettings::from_config(&Config::default());
        assert!(!s.has_credential());
        s.api_key = Some("   ".into());
        assert!(!s.has_credential());
        s.api_key = Some("k".into());
        assert!(s.has_credential());
    }

    #[test]
    fn masking() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("secret-key-1234"), "***********1234");
    }
}
