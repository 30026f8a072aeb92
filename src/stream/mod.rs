//! Incrementally loaded audio streams.
//!
//! A stream starts filling from its source as soon as it is opened. Readers
//! never wait on the fill thread: header fields, amplitude samples and the
//! sequential byte feed all reflect whatever has arrived so far.

pub mod amplitude;
pub mod buffer;
pub mod error;
pub mod wav;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub use error::StreamError;
pub use wav::WavStream;

/// Sample encodings the output can be asked to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Signed 16-bit little-endian PCM
    PcmS16Le,
}

impl AudioFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::PcmS16Le => 2,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PcmS16Le => write!(f, "s16le"),
        }
    }
}

/// Container types that can be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFileType {
    Wav,
}

impl AudioFileType {
    /// Picks the container from a file extension, ignoring ASCII case.
    ///
    /// # Errors
    /// - [`StreamError::UnsupportedFileType`] for anything but `.wav`
    pub fn from_path(path: &Path) -> Result<Self, StreamError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("wav") => Ok(Self::Wav),
            Some(other) => Err(StreamError::UnsupportedFileType(format!(".{other}"))),
            None => Err(StreamError::UnsupportedFileType(String::new())),
        }
    }
}

/// A playable stream, independent of its container format.
///
/// Header accessors return `None` until enough bytes have been buffered;
/// callers poll [`StreamSource::bytes_available`] or use
/// [`StreamSource::wait_until_buffered`].
pub trait StreamSource: Send + Sync {
    fn sample_rate(&self) -> Option<u32>;

    fn channel_count(&self) -> Option<u16>;

    /// Validates the header and returns the sample encoding.
    fn format(&self) -> Result<AudioFormat, StreamError>;

    /// Byte offset at which sample data begins.
    fn data_offset(&self) -> usize;

    fn read_sequential(&self, buf: &mut [u8]) -> Result<usize, StreamError>;

    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Peak amplitude in `[0, 1]` of a short window starting at byte `pos`.
    fn amplitude_at_pos(&self, pos: usize) -> Result<f64, StreamError>;

    fn bytes_available(&self) -> usize;

    /// Bytes consumed through the sequential interface so far.
    fn position(&self) -> usize;

    fn wait_until_buffered(&self, wanted: usize, timeout: Duration) -> Result<usize, StreamError>;

    /// A reader over the sequential interface, suitable for an audio output.
    fn sequential_reader(&self) -> Box<dyn Read + Send>;

    fn close(&self);
}

/// Opens `path` and starts loading it in the background.
///
/// # Errors
/// - [`StreamError::UnsupportedFileType`] if the extension is not `.wav`
/// - [`StreamError::Open`] if the file cannot be opened
pub fn open_file(path: &Path) -> Result<Box<dyn StreamSource>, StreamError> {
    let file_type = AudioFileType::from_path(path)?;
    let file = File::open(path).map_err(|source| StreamError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Opened {} as {:?}", path.display(), file_type);
    open_reader(file, file_type).map_err(|source| StreamError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Starts loading an arbitrary byte source of the given container type.
///
/// # Errors
/// - If the fill thread cannot be spawned
pub fn open_reader<R>(source: R, file_type: AudioFileType) -> std::io::Result<Box<dyn StreamSource>>
where
    R: Read + Send + 'static,
{
    match file_type {
        AudioFileType::Wav => Ok(Box::new(WavStream::start(source)?)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Builds a canonical 44-byte-header WAV image around `samples`.
    pub fn wav_bytes(channels: u16, sample_rate: u32, bits: u16, samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * u32::from(block_align);

        let mut out = Vec::with_capacity(44 + data.len());
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        out
    }
}
