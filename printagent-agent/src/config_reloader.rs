use std::path::PathBuf;
use std::time::Duration;

use printagent_agent::AgentHandle;
use printagent_config::{AgentSettings, Config, FileSettings, SettingsProvider};
use tokio::task::JoinHandle;

use crate::tracing_setup::ReloadHandle;

/// Periodically re-read the config file and settings store.
///
/// Hot-reloads the log level, and hands changed connection/printer settings
/// to the agent as a fresh snapshot. Anything else needs a restart.
pub fn spawn_config_reloader(
    config_path: Option<String>,
    settings_path: PathBuf,
    interval: Duration,
    initial: Config,
    reload_handle: Option<ReloadHandle>,
    agent: AgentHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = initial;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let store = match FileSettings::open(&settings_path) {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!(%e, path = %settings_path.display(), "failed to read settings store");
                    continue;
                }
            };
            let store: &dyn SettingsProvider = &store;
            let new_cfg = match printagent_config::load_layered(config_path.as_deref(), Some(store)) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(%e, "failed to reload config");
                    continue;
                }
            };
            if let Err(e) = printagent_config::validate_config(&new_cfg) {
                tracing::error!(%e, "reloaded config failed validation, ignoring");
                continue;
            }
            if new_cfg == current {
                continue;
            }

            tracing::info!("configuration changed");
            reload_log_level(&current, &new_cfg, &reload_handle);

            let old_settings = AgentSettings::from_config(&current);
            let new_settings = AgentSettings::from_config(&new_cfg);
            if old_settings != new_settings {
                if agent.reconfigure(new_settings).await.is_err() {
                    tracing::debug!("agent stopped; config reloader exiting");
                    return;
                }
            }
            warn_restart_needed(&current, &new_cfg);

            current = new_cfg;
        }
    })
}

fn reload_log_level(old: &Config, new: &Config, reload_handle: &Option<ReloadHandle>) {
    if old.logging.level == new.logging.level {
        return;
    }
    if let Some(handler) = reload_handle.as_ref() {
        let filter = tracing_subscriber::EnvFilter::new(new.logging.level.clone());
        match handler(filter) {
            Ok(()) => tracing::info!(new_level = %new.logging.level, "log level updated at runtime"),
            Err(e) => tracing::error!(%e, "failed to reload log level"),
        }
    }
}

fn warn_restart_needed(old: &Config, new: &Config) {
    let mut changed = Vec::new();
    if old.printer.backend != new.printer.backend
        || old.printer.timeout_secs != new.printer.timeout_secs
        || old.printer.serialize != new.printer.serialize
    {
        changed.push("printer");
    }
    if old.connection != new.connection {
        changed.push("connection");
    }
    if old.dedupe != new.dedupe {
        changed.push("dedupe");
    }
    if old.database != new.database {
        changed.push("database");
    }
    if old.logging.json != new.logging.json {
        changed.push("logging.json");
    }
    if !changed.is_empty() {
        tracing::warn!(sections = ?changed, "changes take effect after restart");
    }
}
