//! Configuration module

pub mod cache_config;
pub mod cli;

pub use cache_config::{AuthConfig, CacheConfig};
pub use cli::{CliArgs, Command};
