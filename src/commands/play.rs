//! Plays a WAV file while drawing its loudness.
//!
//! The file starts loading in the background immediately; playback begins as
//! soon as the header (plus any configured preload) has arrived.

use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DisplayConfig, SayConfig, VisualizationType};
use crate::playback::{self, CpalBackend, PlaybackOptions};
use crate::stream::{self, StreamSource};
use crate::visualization::{BarPrinter, MeterCommand, MeterTui};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct PlayOverrides {
    pub width: Option<usize>,
    pub interval_ms: Option<u64>,
    pub device: Option<String>,
    pub meter: bool,
}

impl PlayOverrides {
    fn apply(self, config: &mut SayConfig) {
        if let Some(width) = self.width {
            config.display.width = width;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.playback.tick_interval_ms = interval_ms;
        }
        if let Some(device) = self.device {
            config.playback.device = device;
        }
        if self.meter {
            config.display.visualization = VisualizationType::Meter;
        }
    }
}

/// Returned from the visualization callback when the user asks to stop.
#[derive(Debug, thiserror::Error)]
#[error("playback stopped by user")]
struct StoppedByUser;

/// Plays `path` with the configured visualization.
///
/// # Errors
/// - If the configuration is invalid
/// - If the file cannot be opened or is not 16-bit PCM WAV
/// - If the audio output fails
/// - If drawing to the terminal fails
pub async fn handle_play(path: PathBuf, overrides: PlayOverrides) -> Result<(), anyhow::Error> {
    tracing::info!("=== say playback started: {} ===", path.display());

    let mut config = SayConfig::load()?;
    overrides.apply(&mut config);
    config.validate()?;

    tracing::info!(
        "Configuration: device={}, tick={}ms, thresholds={}..{}, visualization={}",
        config.playback.device,
        config.playback.tick_interval_ms,
        config.playback.low_threshold,
        config.playback.high_threshold,
        config.display.visualization
    );

    tokio::task::spawn_blocking(move || play_file(&path, &config))
        .await
        .map_err(|e| anyhow!("Playback task failed: {e}"))??;

    tracing::info!("=== say playback finished ===");
    Ok(())
}

fn play_file(path: &Path, config: &SayConfig) -> anyhow::Result<()> {
    let stream = stream::open_file(path)?;

    let wanted = stream.data_offset() + config.playback.preload_bytes;
    let timeout = Duration::from_millis(config.playback.start_timeout_ms);
    let buffered = stream
        .wait_until_buffered(wanted, timeout)
        .context("Audio stream did not become ready")?;
    tracing::debug!("{} bytes buffered before playback", buffered);

    let backend = CpalBackend::new(config.playback.device.clone());
    let options = config.playback_options();

    let result = match config.display.visualization {
        VisualizationType::Bar => play_with_bar(&backend, stream.as_ref(), &options, &config.display),
        VisualizationType::Meter => {
            play_with_meter(&backend, stream.as_ref(), &options, &config.display, path)
        }
    };
    stream.close();

    match result {
        Err(e) if e.downcast_ref::<StoppedByUser>().is_some() => {
            tracing::info!("Playback stopped by user");
            Ok(())
        }
        other => other,
    }
}

fn play_with_bar(
    backend: &CpalBackend,
    stream: &dyn StreamSource,
    options: &PlaybackOptions,
    display: &DisplayConfig,
) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let mut printer = BarPrinter::stdout(display.width, display.filled, display.empty);
    printer.draw(0.0)?;

    let result = playback::play_with_callback(backend, stream, options, |amplitude| {
        if interrupted.load(Ordering::SeqCst) {
            return Err(StoppedByUser.into());
        }
        printer.draw(amplitude)?;
        Ok(())
    });

    printer.finish()?;
    result
}

fn play_with_meter(
    backend: &CpalBackend,
    stream: &dyn StreamSource,
    options: &PlaybackOptions,
    display: &DisplayConfig,
    path: &Path,
) -> anyhow::Result<()> {
    let title = format!(
        "{} · {}Hz · {}ch",
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        stream.sample_rate().unwrap_or_default(),
        stream.channel_count().unwrap_or_default()
    );

    let mut tui = MeterTui::new(title, display.filled, display.empty)
        .map_err(|e| anyhow!("Failed to initialize UI: {e}"))?;

    let result = playback::play_with_callback(backend, stream, options, |amplitude| {
        if tui.handle_input()? == MeterCommand::Stop {
            return Err(StoppedByUser.into());
        }
        tui.render(amplitude)
    });

    tui.cleanup()
        .map_err(|e| anyhow!("Cleanup failed: {e}"))?;
    result
}
