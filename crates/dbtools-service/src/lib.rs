//! # Database Tools Service
//!
//! The `dbtoolsservice` process: resolves configuration, sets up logging and
//! serves the database tool services through [`dbtools_host`].

pub mod config;
pub mod logging;
pub mod services;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, Provider, ServiceConfig};
pub use services::build_host;
