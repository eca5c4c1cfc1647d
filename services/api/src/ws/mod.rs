//! WebSocket transport for revision sessions.
//!
//! - `protocol`: the JSON messages the server sends.
//! - `session`: the connection lifecycle, one connection per session id.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
