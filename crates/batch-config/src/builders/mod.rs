//! Builders for test configurations.

pub mod config;

pub use config::ConfigBuilder;
