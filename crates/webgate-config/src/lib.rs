//! Configuration for the webgate gateway.
//!
//! Configuration is layered: TOML file (with `${VAR}` expansion), then
//! `WEBGATE_*` environment overrides, then CLI flags applied by the binary.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BrowserSection, CacheSection, Config, PoolSection, SecuritySection, ServerSection,
};
