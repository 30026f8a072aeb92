//! PCM WAV stream: header decoding on top of a [`StreamBuffer`].
//!
//! Only the canonical 44-byte header layout is understood. Header fields are
//! read lazily from whatever the fill thread has buffered so far.

use std::io::{self, Read};
use std::time::Duration;

use super::amplitude;
use super::buffer::{spawn_fill, StreamBuffer};
use super::error::{Result, StreamError};
use super::{AudioFormat, StreamSource};

/// Size of the fixed WAV header.
pub const HEADER_SIZE: usize = 44;

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const CHANNELS_OFFSET: usize = 22;
const SAMPLE_RATE_OFFSET: usize = 24;
const BITS_PER_SAMPLE_OFFSET: usize = 34;

/// A WAV file being loaded in the background while it is read.
pub struct WavStream {
    buffer: StreamBuffer,
}

impl WavStream {
    /// Starts the fill thread on `source` and returns immediately. The thread
    /// is detached; it exits on its own once the source ends or the stream is
    /// closed.
    ///
    /// # Errors
    /// - If the fill thread cannot be spawned
    pub fn start<R>(source: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let buffer = StreamBuffer::new();
        spawn_fill(buffer.clone(), source)?;
        Ok(Self { buffer })
    }

    /// Wraps an already populated buffer. No fill thread is started.
    #[cfg(test)]
    pub fn from_buffer(buffer: StreamBuffer) -> Self {
        Self { buffer }
    }

    fn header_bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        if self.buffer.bytes_available() < HEADER_SIZE {
            return None;
        }
        let mut raw = [0u8; N];
        (self.buffer.read_at(&mut raw, offset) == N).then_some(raw)
    }

    pub fn bits_per_sample(&self) -> Option<u16> {
        self.header_bytes(BITS_PER_SAMPLE_OFFSET)
            .map(u16::from_le_bytes)
    }
}

impl StreamSource for WavStream {
    fn sample_rate(&self) -> Option<u32> {
        self.header_bytes(SAMPLE_RATE_OFFSET).map(u32::from_le_bytes)
    }

    fn channel_count(&self) -> Option<u16> {
        self.header_bytes(CHANNELS_OFFSET).map(u16::from_le_bytes)
    }

    fn format(&self) -> Result<AudioFormat> {
        let magic: [u8; 4] = self.header_bytes(0).ok_or_else(|| {
            StreamError::UnsupportedFormat(format!(
                "header incomplete ({} of {} bytes)",
                self.buffer.bytes_available(),
                HEADER_SIZE
            ))
        })?;

        if &magic != RIFF_MAGIC {
            return Err(StreamError::UnsupportedFormat(format!(
                "not a RIFF container (magic {:02x?})",
                magic
            )));
        }

        match self.bits_per_sample() {
            Some(16) => Ok(AudioFormat::PcmS16Le),
            Some(bits) => Err(StreamError::UnsupportedFormat(format!(
                "{bits}-bit samples (only 16-bit PCM is supported)"
            ))),
            None => Err(StreamError::UnsupportedFormat(
                "missing bits per sample".to_string(),
            )),
        }
    }

    fn data_offset(&self) -> usize {
        HEADER_SIZE
    }

    fn read_sequential(&self, buf: &mut [u8]) -> Result<usize> {
        self.buffer.read_sequential(buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.buffer.read_at(buf, offset)
    }

    fn amplitude_at_pos(&self, pos: usize) -> Result<f64> {
        let channels = self.channel_count().unwrap_or(1);
        amplitude::amplitude_at_pos(&self.buffer, pos, channels)
    }

    fn bytes_available(&self) -> usize {
        self.buffer.bytes_available()
    }

    fn position(&self) -> usize {
        self.buffer.position()
    }

    fn wait_until_buffered(&self, wanted: usize, timeout: Duration) -> Result<usize> {
        self.buffer.wait_until_buffered(wanted, timeout)
    }

    fn sequential_reader(&self) -> Box<dyn Read + Send> {
        Box::new(self.buffer.sequential_reader())
    }

    fn close(&self) {
        self.buffer.close();
    }
}

impl Drop for WavStream {
    fn drop(&mut self) {
        self.buffer.close();
    }
}
