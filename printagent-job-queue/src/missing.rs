//! Asking the server to redeliver outstanding jobs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ack::ServerLink;

pub const MISSING_EVENT: &str = "request_missing_prints";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Sent right after the connection comes up.
    OnConnect,
    /// Operator asked for it; subject to the cooldown.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingOutcome {
    Sent,
    CoolingDown(Duration),
    NotConnected,
    NoCredential,
    Failed(String),
}

pub struct MissingRequester {
    link: Arc<dyn ServerLink>,
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl MissingRequester {
    pub fn new(link: Arc<dyn ServerLink>, cooldown: Duration) -> Self {
        Self {
            link,
            cooldown,
            last_sent: Mutex::new(None),
        }
    }

    pub async fn request(&self, api_key: Option<&str>, trigger: Trigger) -> MissingOutcome {
        if !self.link.is_connected() {
            tracing::info!("not connected; will request missing jobs after reconnect");
            return MissingOutcome::NotConnected;
        }
        let Some(api_key) = api_key.map(str::trim).filter(|k| !k.is_empty()) else {
            tracing::warn!("no API key configured; cannot request missing jobs");
            return MissingOutcome::NoCredential;
        };

        let mut last_sent = self.last_sent.lock().await;
        let now = Instant::now();
        if trigger == Trigger::Manual {
            if let Some(prev) = *last_sent {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed < self.cooldown {
                    let wait = self.cooldown - elapsed;
                    tracing::debug!(?wait, "missing-job request cooling down");
                    return MissingOutcome::CoolingDown(wait);
                }
            }
        }

        tracing::info!(?trigger, "requesting outstanding labels");
        match self
            .link
            .emit(MISSING_EVENT, json!({ "api_key": api_key }))
            .await
        {
            Ok(()) => {
                *last_sent = Some(now);
                MissingOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(error = %e, "missing-job request failed");
                MissingOutcome::Failed(e)
            }
        }
    }
}
