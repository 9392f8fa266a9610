//! Browser side of the gateway: CDP transport, context pool, session
//! manager, and the per-command executors.
//!
//! The dispatch server consumes this crate through [`SessionManager`]; the
//! underlying browser is reached through the [`driver`] traits, implemented
//! for real Chrome in [`chrome`] and for tests in [`testing`].

pub mod cdp;
pub mod chrome;
pub mod driver;
pub mod error;
pub mod executor;
pub mod pool;
pub mod session;
pub mod testing;

pub use chrome::{ChromeBackend, ChromeConfig};
pub use driver::{BrowserBackend, ContextHandle, PageDriver};
pub use error::{BrowserError, PoolError, SessionError};
pub use pool::{ContextPool, PoolConfig, PoolStats};
pub use session::{SessionConfig, SessionManager, SessionMeta};
