//! Application command handlers for say.
//!
//! # Commands
//! - `play`: Play a WAV file with a live loudness bar or meter (the default)
//! - `list_devices`: List available audio output devices
//! - `logs`: Display recent log entries
//! - `config`: Open the configuration file in the user's preferred editor

pub mod config;
pub mod list_devices;
pub mod logs;
pub mod play;

pub use config::handle_config;
pub use list_devices::handle_list_devices;
pub use logs::handle_logs;
pub use play::{handle_play, PlayOverrides};
