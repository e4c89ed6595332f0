pub mod app;
pub mod error;
pub mod state;
pub mod transport;

pub use app::{
    open_journal, spawn_status_logger, Agent, AgentCommand, AgentHandle, AgentOptions,
};
pub use error::AgentError;
pub use state::SharedSettings;
pub use transport::LinkTransport;
