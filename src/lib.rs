//! Slither Arena Server Library
//!
//! Authoritative server for a real-time multiplayer snake arena over
//! WebTransport. One session runs one match: snakes steer, eat pellets that
//! carry a token payout, and die on contact with another snake's body or
//! the arena edge.
//!
//! # Features
//!
//! - `http` - HTTP settlement endpoint and entropy polling (reqwest)

pub mod config;
pub mod entropy;
pub mod game;
pub mod metrics;
pub mod net;
pub mod settlement;
pub mod util;
