//! murmur-server: relay for end-to-end encrypted messages.
//!
//! Clients log in over the auth HTTP API, open a WebSocket carrying the
//! session cookie, and exchange opaque envelopes addressed by username. The
//! server only routes and tracks presence.

pub mod auth;
pub mod config;
pub mod connection;
pub mod gatekeeper;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use config::ServerConfig;
pub use server::RelayServer;
