//! List available audio output devices.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::playback::device::{named_output_devices, suppress_alsa_warnings};

/// Lists all audio output devices on the system.
///
/// The printed IDs and names are what `device` in `say.toml` (or `--device`)
/// accepts; IDs are resolved against the same list during playback.
///
/// # Errors
/// - If the audio host cannot enumerate devices
pub fn handle_list_devices() -> Result<(), anyhow::Error> {
    let (host, devices) = suppress_alsa_warnings(|| {
        let host = cpal::default_host();
        let devices = named_output_devices(&host)?;
        Ok((host, devices))
    })?;

    if devices.is_empty() {
        println!("No audio output devices found on this system.");
        return Ok(());
    }

    println!();
    println!("Available audio output devices:");
    println!();

    let default_device = host.default_output_device().and_then(|d| d.name().ok());

    for (index, (device, device_name)) in devices.iter().enumerate() {
        let default_indicator = if default_device.as_ref() == Some(device_name) {
            " [DEFAULT]"
        } else {
            ""
        };

        let config_info = match device.default_output_config() {
            Ok(config) => format!(
                " ({}Hz, {} channels, {:?})",
                config.sample_rate().0,
                config.channels(),
                config.sample_format()
            ),
            Err(_) => " (configuration unavailable)".to_string(),
        };

        println!("  ID: {}", index);
        println!("    Name: {}{}", device_name, default_indicator);
        println!("    Config:{}", config_info);
        println!();
    }

    Ok(())
}
