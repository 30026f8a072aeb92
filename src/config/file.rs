//! Configuration file management for say.
//!
//! Settings live in `~/.config/say/say.toml`. Every field has a default, so a
//! missing file or a partial one is fine.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::playback::normalize::{DEFAULT_HIGH, DEFAULT_LOW};
use crate::playback::PlaybackOptions;

/// How loudness is drawn while playing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    /// Single mirrored bar redrawn in place on stdout
    #[default]
    Bar,
    /// Full-screen meter with a scrolling history
    Meter,
}

impl std::fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bar => write!(f, "bar"),
            Self::Meter => write!(f, "meter"),
        }
    }
}

/// Playback and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device: "default", a numeric index or a name from `say list-devices`
    pub device: String,
    /// Milliseconds between amplitude ticks
    pub tick_interval_ms: u64,
    /// Raw amplitude (0-1) at or below which the bar is empty
    pub low_threshold: f64,
    /// Raw amplitude (0-1) at or above which the bar is full
    pub high_threshold: f64,
    /// Audio bytes to buffer beyond the header before playback starts
    pub preload_bytes: usize,
    /// How long to wait for the header and preload before giving up
    pub start_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            tick_interval_ms: 50,
            low_threshold: DEFAULT_LOW,
            high_threshold: DEFAULT_HIGH,
            preload_bytes: 0,
            start_timeout_ms: 5000,
        }
    }
}

/// Terminal display settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Width of the inline bar in characters
    pub width: usize,
    /// Character for lit cells
    pub filled: char,
    /// Character for unlit cells
    pub empty: char,
    pub visualization: VisualizationType,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 20,
            filled: '#',
            empty: ' ',
            visualization: VisualizationType::default(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SayConfig {
    pub playback: PlaybackConfig,
    pub display: DisplayConfig,
}

impl SayConfig {
    /// Loads configuration from the user's config directory, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    /// - If the config directory cannot be determined
    /// - If the config file cannot be read
    /// - If the TOML is malformed or values are out of range
    pub fn load() -> anyhow::Result<Self> {
        let config_path = get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Loads configuration from `path`, or defaults if it does not exist.
    ///
    /// # Errors
    /// - If the file cannot be read
    /// - If the TOML is malformed or values are out of range
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parses and validates TOML content.
    ///
    /// # Errors
    /// - If the TOML is malformed or values are out of range
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: SayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    /// - If thresholds are outside `0 <= low < high <= 1`
    /// - If the tick interval is zero
    /// - If the bar width is below 2
    pub fn validate(&self) -> anyhow::Result<()> {
        let low = self.playback.low_threshold;
        let high = self.playback.high_threshold;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(anyhow!(
                "Thresholds must satisfy 0 <= low_threshold < high_threshold <= 1 (got {low} and {high})"
            ));
        }
        if self.playback.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms must be at least 1"));
        }
        if self.display.width < 2 {
            return Err(anyhow!("Display width must be at least 2"));
        }
        Ok(())
    }

    /// Saves configuration to the user's config directory.
    ///
    /// # Errors
    /// - If the config directory cannot be determined or created
    /// - If the file cannot be written
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = get_config_path()?;
        let config_content = toml::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        tracing::info!("Configuration saved to {}", config_path.display());
        Ok(())
    }

    /// Timing and threshold settings for the playback driver.
    pub fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            tick_interval: Duration::from_millis(self.playback.tick_interval_ms),
            low: self.playback.low_threshold,
            high: self.playback.high_threshold,
        }
    }
}

/// Retrieves the path to the config file, creating its directory.
///
/// # Errors
/// - If the home directory cannot be determined
/// - If the config directory cannot be created
pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not determine home directory"))?
        .join(".config")
        .join("say");

    fs::create_dir_all(&config_dir)
        .map_err(|e| anyhow!("Failed to create config directory: {e}"))?;

    Ok(config_dir.join("say.toml"))
}
