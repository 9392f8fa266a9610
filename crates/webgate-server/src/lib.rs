//! WebSocket dispatch server for the browser-automation gateway.
//!
//! Accepts persistent connections carrying one JSON object per frame,
//! pushes each frame through the auth → rate-limit → sanitize → validate
//! pipeline, routes commands onto per-session workers, and streams the
//! replies back preserving per-session arrival order.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use server::GatewayServer;
pub use state::AppState;
