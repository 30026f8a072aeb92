//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands::{self, PlayOverrides};
use crate::logging;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process;

/// Plays a WAV file while drawing its loudness in the terminal
#[derive(Parser)]
#[command(name = "say")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "Plays a 16-bit PCM WAV file while it is still loading and draws a bar that\ngrows and shrinks with the loudness of what you are hearing.\n\nEXAMPLES:\n    # Play with the inline bar\n    $ say greeting.wav\n    \n    # Wider bar, redrawn every 20ms\n    $ say greeting.wav --width 40 --interval 20\n    \n    # Full-screen meter on a specific device\n    $ say greeting.wav --meter --device 1\n    \n    # Edit configuration file\n    $ say config")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/say/say.toml\n    Logs:               ~/.local/state/say/say.log.*"
)]
struct Cli {
    /// The WAV file to play
    #[arg(value_name = "FILE.wav", value_parser = parse_wav_path)]
    file: Option<PathBuf>,

    /// Width of the loudness bar in characters
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(2..))]
    width: Option<u16>,

    /// Milliseconds between visualization updates
    #[arg(short, long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Show the full-screen meter instead of the inline bar
    #[arg(short, long)]
    meter: bool,

    /// Output device ID or name (see `say list-devices`)
    #[arg(short, long, value_name = "DEV")]
    device: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio output devices
    ///
    /// Shows every output device with its ID, name, and default format.
    /// Use an ID or name as `device` in the config file or with --device.
    ListDevices,

    /// Show recent log entries
    Logs,

    /// Open the configuration file in your editor
    ///
    /// Creates the file with default values first if it does not exist.
    Config,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   say completions bash > say.bash
    ///   say completions zsh > _say
    ///   say completions fish > say.fish
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Accepts only paths ending in `.wav` (case-insensitive).
fn parse_wav_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

    if is_wav {
        Ok(path)
    } else {
        Err(format!("'{value}' is not a .wav file"))
    }
}

impl Cli {
    fn overrides(&self) -> PlayOverrides {
        PlayOverrides {
            width: self.width.map(usize::from),
            interval_ms: self.interval,
            device: self.device.clone(),
            meter: self.meter,
        }
    }
}

/// Runs the main application based on command-line arguments.
///
/// # Exit Codes
/// - 0: Success
/// - 1: General error
/// - 2: Usage error (invalid arguments)
///
/// # Errors
/// - If logging initialization fails
/// - If command execution fails (e.g., unreadable file, audio device failure)
pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Handle commands that don't need logging
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "say", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::ListDevices) => {
            return match commands::handle_list_devices() {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            };
        }
        Some(Commands::Logs) => {
            return match commands::handle_logs() {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            };
        }
        _ => {}
    }

    logging::init_logging()?;

    let overrides = cli.overrides();
    match cli.command {
        None => {
            let Some(file) = cli.file else {
                Cli::command()
                    .error(ErrorKind::MissingRequiredArgument, "a .wav file to play is required")
                    .exit();
            };
            commands::handle_play(file, overrides).await?;
        }
        Some(Commands::Config) => {
            commands::handle_config()?;
        }
        Some(Commands::Completions { .. }) | Some(Commands::ListDevices) | Some(Commands::Logs) => {
            unreachable!("These commands are handled earlier")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_file_and_flags() {
        let cli = Cli::try_parse_from([
            "say", "hello.wav", "--width", "40", "--interval", "25", "--meter", "--device", "1",
        ])
        .unwrap();

        assert_eq!(cli.file, Some(PathBuf::from("hello.wav")));
        assert!(cli.command.is_none());

        let overrides = cli.overrides();
        assert_eq!(overrides.width, Some(40));
        assert_eq!(overrides.interval_ms, Some(25));
        assert_eq!(overrides.device.as_deref(), Some("1"));
        assert!(overrides.meter);
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let cli = Cli::try_parse_from(["say", "LOUD.WAV"]).unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("LOUD.WAV")));
    }

    #[test]
    fn test_rejects_other_extensions() {
        for name in ["song.mp3", "wav", "notes.wav.txt"] {
            let err = Cli::try_parse_from(["say", name]).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::ValueValidation, "{name}");
        }
    }

    #[test]
    fn test_rejects_extra_arguments() {
        let err = Cli::try_parse_from(["say", "a.wav", "b.wav"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_rejects_narrow_bar() {
        assert!(Cli::try_parse_from(["say", "a.wav", "--width", "1"]).is_err());
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["say", "list-devices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::ListDevices)));

        let cli = Cli::try_parse_from(["say", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Zsh })
        ));
    }

    #[test]
    fn test_usage_errors_exit_with_two() {
        let err = Cli::try_parse_from(["say", "song.mp3"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}
