//! Realtime change feed over WebSocket.
//!
//! Devices connect to `/realtime`, subscribe with one filter per table, and
//! receive every row change of their tenant that the HTTP API commits. The
//! message types are shared with devices through `tabsync_engine::feed`.

mod manager;

pub use manager::{Connection, ConnectionManager, MessageSender, SubscribeError};
