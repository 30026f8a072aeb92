//! Interface to the audio output the driver feeds and polls.
//!
//! The driver never receives push notifications from the output: it asks the
//! player how far it has got and how much it is still holding back. This keeps
//! the device swappable for a fake in tests.

use std::io::Read;

use anyhow::Result;

use crate::stream::AudioFormat;

/// Parameters used to open an output for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
    /// Leading bytes of the sequential feed that are not samples.
    pub data_offset: usize,
}

/// Creates output contexts for a given stream format.
pub trait OutputBackend {
    type Context: OutputContext;

    fn create(&self, spec: OutputSpec) -> Result<Self::Context>;
}

/// An opened output, able to play byte sources.
pub trait OutputContext {
    type Player: Player;

    fn new_player(&self, source: Box<dyn Read + Send>) -> Result<Self::Player>;
}

/// A single playing byte source.
pub trait Player {
    fn play(&mut self) -> Result<()>;

    /// `false` once every byte of the source has been played, or after `close`.
    fn is_playing(&self) -> bool;

    /// Cumulative bytes pulled from the source.
    fn position(&self) -> usize;

    /// Bytes pulled from the source that have not been heard yet.
    fn buffered_byte_count(&self) -> usize;

    fn close(&mut self);
}
