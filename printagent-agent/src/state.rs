use std::sync::{Arc, RwLock};

use printagent_config::AgentSettings;

/// Current connection/printer settings, replaced wholesale on reload.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<Arc<AgentSettings>>>,
}

impl SharedSettings {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn current(&self) -> Arc<AgentSettings> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Install `new` and return the snapshot it replaced.
    pub fn swap(&self, new: AgentSettings) -> Arc<AgentSettings> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(new))
    }
}
