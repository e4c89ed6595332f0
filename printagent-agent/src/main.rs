//! printagent
//!
//! Entry point: configuration loading, tracing, and either the long-running
//! agent or one of the one-shot subcommands.

use std::time::Duration;

use clap::Parser;
use printagent_agent::{open_journal, spawn_status_logger, Agent, AgentOptions};
use printagent_config::{AgentSettings, Config, FileSettings, SettingsProvider};
use printagent_job_queue::EventBus;

mod cli;
mod commands;
mod config_reloader;
mod tracing_setup;

use cli::{Cli, Command, RunArgs, SettingsCommand};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();
    let settings_path = cli.settings_path();

    let store = FileSettings::open(&settings_path)?;
    let config = load_config(config_path.as_deref(), &store)?;
    let reload_handle = install_tracing_from_config(&config.logging);

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            printagent_config::validate_config(&config)?;
            let sink = commands::sink_for(&config, args.dry_run)?;
            tracing::info!(
                config = ?config_path,
                settings = %settings_path.display(),
                server = %config.server.url,
                printer = %config.printer.name,
                backend = %config.printer.backend,
                "starting print agent"
            );

            let journal = open_journal(&config).await?;
            let events = EventBus::new();
            let logger = spawn_status_logger(events.subscribe());
            let (agent, mut task) = Agent::start(
                AgentSettings::from_config(&config),
                AgentOptions::from_config(&config),
                journal,
                sink,
                events,
            );

            if config.reload.enabled {
                config_reloader::spawn_config_reloader(
                    config_path.clone(),
                    settings_path.clone(),
                    Duration::from_secs(config.reload.interval_secs),
                    config.clone(),
                    reload_handle,
                    agent.clone(),
                );
            }

            let stopped = tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::error!(%e, "cannot listen for Ctrl-C");
                    }
                    tracing::info!("interrupt received");
                    false
                }
                res = &mut task => {
                    res?;
                    true
                }
            };
            if !stopped {
                let _ = agent.shutdown().await;
                task.await?;
            }
            drop(agent);
            logger.abort();
            Ok(())
        }
        Command::History { limit, json } => commands::history(&config, limit, json).await,
        Command::Reprint { invoice, dry_run } => {
            commands::reprint(&config, &invoice, dry_run).await
        }
        Command::TestPrint { file, dry_run } => {
            commands::test_print(&config, &file, dry_run).await
        }
        Command::Settings { command } => match command {
            SettingsCommand::Get { key } => commands::settings_get(&store, key.as_deref()),
            SettingsCommand::Set { key, value } => commands::settings_set(&store, &key, &value),
            SettingsCommand::Unset { key } => commands::settings_unset(&store, &key),
        },
    }
}

/// Defaults, then the config file, then stored settings, then `PRINTAGENT_*` variables.
fn load_config(path: Option<&str>, store: &dyn SettingsProvider) -> anyhow::Result<Config> {
    printagent_config::load_layered(path, Some(store)).map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })
}
