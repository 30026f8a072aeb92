//! Peak amplitude of a short window of 16-bit PCM samples.

use super::buffer::StreamBuffer;
use super::error::{Result, StreamError};

/// Maximum number of samples inspected per call.
pub const WINDOW_SAMPLES: usize = 32;

const BYTES_PER_SAMPLE: usize = 2;

/// Returns the peak of up to [`WINDOW_SAMPLES`] samples starting at byte `pos`.
///
/// Samples are taken from one channel lane: consecutive reads are
/// `2 * channels` bytes apart. Sampling stops at the first sample that is not
/// fully buffered yet. The peak (not the mean) is used so that short
/// transients stay visible at a low refresh rate.
///
/// # Errors
/// - [`StreamError::EndOfStream`] if not a single sample is available at `pos`
pub fn amplitude_at_pos(buffer: &StreamBuffer, pos: usize, channels: u16) -> Result<f64> {
    let stride = BYTES_PER_SAMPLE * usize::from(channels.max(1));
    let available = buffer.bytes_available();

    let mut peak = 0.0f64;
    let mut collected = 0;
    while collected < WINDOW_SAMPLES {
        let offset = pos + collected * stride;
        if offset + BYTES_PER_SAMPLE > available {
            break;
        }

        let mut raw = [0u8; BYTES_PER_SAMPLE];
        if buffer.read_at(&mut raw, offset) < BYTES_PER_SAMPLE {
            break;
        }

        let sample = i16::from_le_bytes(raw);
        let normalized = (f64::from(sample) / 32768.0).abs();
        peak = peak.max(normalized);
        collected += 1;
    }

    if collected == 0 {
        return Err(StreamError::EndOfStream);
    }

    Ok(peak.min(1.0))
}
