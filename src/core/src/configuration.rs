//! Service configuration.
//!
//! [`config::Config`] is what the binary reads from its TOML file;
//! [`types::ServiceSettings`] is the subset the service runtime needs.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::ServiceSettings;
