//! Configuration for testdock
//!
//! This crate handles the engine configuration file
//! (`~/.config/testdock/config.toml`) and its environment overrides.

mod error;
mod global;

pub use error::*;
pub use global::*;
