//! Configuration management for say.
//!
//! Loads playback and display settings from a TOML file in the user's config
//! directory. Command-line flags override individual values.

pub mod file;

pub use file::{get_config_path, DisplayConfig, SayConfig, VisualizationType};
