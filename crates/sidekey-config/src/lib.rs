//! Configuration parsing for sidekey
//!
//! This crate handles parsing the KDL configuration file for the sidekey
//! daemon: which physical devices to capture, the pointer DPI scale, the
//! keyboard event queue sizing and overflow policy, and recovery timing.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
