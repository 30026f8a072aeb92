//! Error types shared by the stream buffer, the WAV decoder and the sampler.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a stream will never produce more bytes.
///
/// Stored once in the buffer (first writer wins) and attached to every short
/// read that follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The underlying source was read to the end.
    Eof,
    /// The stream was closed explicitly.
    Closed,
    /// The underlying source failed.
    Failed { kind: io::ErrorKind, message: String },
}

impl Terminal {
    pub(crate) fn from_io(err: &io::Error) -> Self {
        Terminal::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// The error reported when a read returns no bytes at all.
    pub fn to_error(&self) -> StreamError {
        match self {
            Terminal::Eof => StreamError::EndOfStream,
            Terminal::Closed => StreamError::Closed,
            Terminal::Failed { kind, message } => StreamError::Source {
                kind: *kind,
                message: message.clone(),
            },
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Eof => write!(f, "end of stream"),
            Terminal::Closed => write!(f, "stream closed"),
            Terminal::Failed { message, .. } => write!(f, "source failed: {message}"),
        }
    }
}

/// Errors produced while opening, decoding or reading an audio stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported file type '{0}'")]
    UnsupportedFileType(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Fewer bytes than requested were read and no more will ever arrive.
    #[error("short read: got {read} of {requested} bytes ({cause})")]
    ShortRead {
        read: usize,
        requested: usize,
        cause: Terminal,
    },

    /// No data exists at or beyond the requested offset.
    #[error("end of stream")]
    EndOfStream,

    #[error("stream closed")]
    Closed,

    #[error("source read failed: {message}")]
    Source { kind: io::ErrorKind, message: String },

    /// The stream did not buffer enough bytes before the deadline.
    #[error("stream not ready: {buffered} of {wanted} bytes buffered")]
    NotReady { buffered: usize, wanted: usize },
}

impl StreamError {
    /// Whether this is the non-fatal "nothing at this offset" sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamError::EndOfStream)
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
