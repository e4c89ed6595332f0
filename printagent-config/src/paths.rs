use std::path::PathBuf;

pub const APP_DIR: &str = "PrintAgent";
pub const DATABASE_FILE: &str = "prints.db";
pub const SETTINGS_FILE: &str = "settings.json";

/// Per-user data directory for the journal and stored settings.
///
/// Falls back to the working directory when the platform reports none.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn settings_path() -> PathBuf {
    data_dir().join(SETTINGS_FILE)
}
