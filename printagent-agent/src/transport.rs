//! Adapts the connection task to the pipeline's outbound seam.

use printagent_job_queue::{async_trait, ServerLink};
use printagent_link::LinkHandle;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct LinkTransport {
    link: LinkHandle,
}

impl LinkTransport {
    pub fn new(link: LinkHandle) -> Self {
        Self { link }
    }
}

#[async_trait]
impl ServerLink for LinkTransport {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn emit(&self, event: &'static str, data: Value) -> Result<(), String> {
        self.link.emit(event, data).await.map_err(|e| e.to_string())
    }
}
