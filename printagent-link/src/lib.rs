//! Socket.IO link to the print server.
//!
//! [`LinkHandle::spawn`] starts a task that owns the WebSocket, keeps the
//! Engine.IO heartbeat, retries on a fixed schedule and surfaces server
//! events as [`LinkEvent`]s.

pub mod error;
pub mod manager;
pub mod messages;
pub mod protocol;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use error::LinkError;
pub use manager::{LinkEvent, LinkHandle, LinkOptions};
pub use messages::{PrintLabel, StatusMessage, PRINT_LABEL_EVENT, STATUS_EVENT};
pub use state::{ConnectionState, DisconnectReason};
