//! One-shot subcommands.

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context};
use printagent_agent::{open_journal, Agent, AgentOptions};
use printagent_config::settings::mask;
use printagent_config::{AgentSettings, Config, SettingKey, SettingsProvider};
use printagent_job_queue::PrintSink;
use printagent_sinks::{build_sink, Backend};

pub fn sink_for(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn PrintSink>> {
    let backend = if dry_run {
        Backend::DryRun
    } else {
        config.printer.backend.parse::<Backend>()?
    };
    Ok(build_sink(backend))
}

pub async fn history(config: &Config, limit: u32, json: bool) -> anyhow::Result<()> {
    let journal = open_journal(config).await?;
    let rows = journal.recent(limit).await?;
    journal.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("no prints recorded");
        return Ok(());
    }
    println!("{:<8} {:<20} {:>6} {:<20} {}", "JOB", "INVOICE", "PCS", "PRINTED", "ACKED");
    for r in rows {
        let job = r.job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
        let acked = if r.acknowledged { "yes" } else { "no" };
        println!(
            "{:<8} {:<20} {:>6} {:<20} {}",
            job, r.invoice, r.copies, r.timestamp, acked
        );
    }
    Ok(())
}

pub async fn reprint(config: &Config, invoice: &str, dry_run: bool) -> anyhow::Result<()> {
    let journal = open_journal(config).await?;
    let dispatcher = Agent::offline_dispatcher(
        &AgentSettings::from_config(config),
        &AgentOptions::from_config(config),
        journal.clone(),
        sink_for(config, dry_run)?,
    );
    let result = dispatcher.reprint(invoice).await;
    journal.close().await;
    let outcome = result.with_context(|| format!("reprint of {invoice} failed"))?;
    println!("{}", outcome.message);
    Ok(())
}

pub async fn test_print(config: &Config, file: &str, dry_run: bool) -> anyhow::Result<()> {
    let payload = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?
    };

    let journal = open_journal(config).await?;
    let dispatcher = Agent::offline_dispatcher(
        &AgentSettings::from_config(config),
        &AgentOptions::from_config(config),
        journal.clone(),
        sink_for(config, dry_run)?,
    );
    let outcome = dispatcher.test_print(&payload).await;
    journal.close().await;

    if !outcome.success {
        bail!("test print failed: {}", outcome.message);
    }
    println!("{}", outcome.message);
    Ok(())
}

pub fn settings_get(store: &dyn SettingsProvider, key: Option<&str>) -> anyhow::Result<()> {
    let keys = match key {
        Some(k) => vec![k.parse::<SettingKey>()?],
        None => SettingKey::ALL.to_vec(),
    };
    for key in keys {
        let shown = match store.get(key) {
            Some(v) if key.is_secret() => mask(&v),
            Some(v) => v,
            None => "(unset)".to_string(),
        };
        println!("{key} = {shown}");
    }
    Ok(())
}

pub fn settings_set(store: &dyn SettingsProvider, key: &str, value: &str) -> anyhow::Result<()> {
    let key = key.parse::<SettingKey>()?;
    let value = value.trim();
    if value.is_empty() {
        bail!("{key} cannot be empty; use `settings unset {key}`");
    }
    if key == SettingKey::ServerUrl {
        printagent_link::protocol::endpoint_url(value)?;
    }
    store.set(key, value)?;
    tracing::info!(%key, "setting saved");
    Ok(())
}

pub fn settings_unset(store: &dyn SettingsProvider, key: &str) -> anyhow::Result<()> {
    let key = key.parse::<SettingKey>()?;
    store.remove(key)?;
    tracing::info!(%key, "setting removed");
    Ok(())
}
