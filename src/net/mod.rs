//! Networking: wire protocol, per-subscriber sync and the WebTransport edge

pub mod commands;
pub mod connection;
pub mod delta;
pub mod framing;
pub mod game_session;
pub mod protocol;
pub mod tls;
pub mod transport;
