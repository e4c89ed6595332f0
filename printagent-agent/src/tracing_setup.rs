use std::sync::Arc;

use tracing_subscriber::prelude::*;

/// Swaps the active `EnvFilter` at runtime.
pub type ReloadHandle =
    Arc<dyn Fn(tracing_subscriber::EnvFilter) -> Result<(), String> + Send + Sync>;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn install_tracing_from_config(cfg: &printagent_config::LoggingConfig) -> Option<ReloadHandle> {
    use tracing_subscriber::fmt::time::ChronoUtc;

    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::new(&filter_str);
    let (filter_layer, reload_handle) = tracing_subscriber::reload::Layer::new(env_filter);

    // The two formatters are different types, so each branch builds its own registry.
    let installed = if cfg.json {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().with_timer(ChronoUtc::rfc_3339()))
            .try_init()
    };

    if let Err(e) = installed {
        eprintln!("tracing already initialised: {e}");
        return None;
    }

    Some(Arc::new(move |filter| {
        reload_handle
            .reload(filter)
            .map_err(|e| format!("reload failed: {e}"))
    }))
}
