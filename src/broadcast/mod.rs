//! Listener broadcast: shared snapshot plus the polling endpoint.

pub mod server;
pub mod state;

pub use server::ListenerServer;
pub use state::{ListenerBroadcastState, ListenerSnapshot};
