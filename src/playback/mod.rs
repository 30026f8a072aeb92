//! Playback driver: feeds a stream to an audio output and reports loudness.
//!
//! The driver polls rather than waits. Each tick it asks the player how many
//! bytes it has pulled and how many of those are still queued, samples the
//! stream at the byte that is audible right now, and hands the normalized
//! value to the caller.

pub mod device;
pub mod normalize;
pub mod sink;

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::stream::{StreamError, StreamSource};
use normalize::normalize;
use sink::{OutputBackend, OutputContext, OutputSpec, Player};

pub use device::CpalBackend;

/// Timing and contrast settings for one playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    /// Delay between amplitude ticks
    pub tick_interval: Duration,
    /// Raw amplitude at or below which the display is empty
    pub low: f64,
    /// Raw amplitude at or above which the display is full
    pub high: f64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            low: normalize::DEFAULT_LOW,
            high: normalize::DEFAULT_HIGH,
        }
    }
}

/// Plays `source` through `backend`, calling `on_amplitude` once per tick with
/// a value in `[0, 1]` until playback finishes.
///
/// The header is validated before any output is opened. Reaching the end of
/// the buffered data while sampling counts as silence; any other sampling
/// error, or an error from `on_amplitude`, stops playback and is returned.
/// The player is closed on every exit path.
///
/// # Errors
/// - If the stream format is unsupported or its header is incomplete
/// - If the output cannot be created or started
/// - If amplitude sampling fails for a reason other than end of stream
/// - If `on_amplitude` fails
pub fn play_with_callback<B, F>(
    backend: &B,
    source: &dyn StreamSource,
    options: &PlaybackOptions,
    mut on_amplitude: F,
) -> Result<()>
where
    B: OutputBackend,
    F: FnMut(f64) -> Result<()>,
{
    let format = source.format().context("failed to get format")?;
    let (sample_rate, channels) = match (source.sample_rate(), source.channel_count()) {
        (Some(rate), Some(channels)) if rate > 0 && channels > 0 => (rate, channels),
        (rate, channels) => {
            return Err(anyhow!(StreamError::UnsupportedFormat(format!(
                "invalid header: sample rate {rate:?}, channels {channels:?}"
            ))))
        }
    };

    let spec = OutputSpec {
        sample_rate,
        channels,
        format,
        data_offset: source.data_offset(),
    };
    tracing::info!(
        "Starting playback: {}Hz, {} channels, {}",
        sample_rate,
        channels,
        format
    );

    let context = backend
        .create(spec)
        .context("failed to create audio output")?;
    let mut player = context
        .new_player(source.sequential_reader())
        .context("failed to create player")?;

    let result = player
        .play()
        .context("failed to start playback")
        .and_then(|()| poll_until_finished(&player, source, options, &mut on_amplitude));
    player.close();

    match &result {
        Ok(ticks) => tracing::info!("Playback finished after {} ticks", ticks),
        Err(e) => tracing::error!("Playback aborted: {:#}", e),
    }
    result.map(|_| ())
}

fn poll_until_finished<P, F>(
    player: &P,
    source: &dyn StreamSource,
    options: &PlaybackOptions,
    on_amplitude: &mut F,
) -> Result<u64>
where
    P: Player,
    F: FnMut(f64) -> Result<()>,
{
    let mut ticks = 0u64;
    while player.is_playing() {
        let played = player.position();
        let pending = player.buffered_byte_count();
        let amplitude_pos = played.saturating_sub(pending);

        let amplitude = match source.amplitude_at_pos(amplitude_pos) {
            Ok(amplitude) => amplitude,
            Err(e) if e.is_end_of_stream() => 0.0,
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to get amplitude at pos {amplitude_pos}")))
            }
        };

        on_amplitude(normalize(amplitude, options.low, options.high))
            .context("callback failed")?;

        ticks += 1;
        if ticks % 100 == 0 {
            tracing::debug!(
                "Tick {}: played {} bytes, {} queued, {} buffered",
                ticks,
                played,
                pending,
                source.bytes_available()
            );
        }
        thread::sleep(options.tick_interval);
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_support::wav_bytes;
    use crate::stream::buffer::StreamBuffer;
    use crate::stream::error::Terminal;
    use crate::stream::{AudioFormat, WavStream};
    use std::cell::{Cell, RefCell};
    use std::io::{self, Read};
    use std::rc::Rc;

    /// Pulls a fixed number of bytes from its source every time it is polled.
    struct FakePlayer {
        reader: RefCell<Box<dyn Read + Send>>,
        bytes_per_tick: usize,
        queued: usize,
        pulled: Cell<usize>,
        done: Cell<bool>,
        closed: Rc<Cell<bool>>,
    }

    impl Player for FakePlayer {
        fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_playing(&self) -> bool {
            if self.closed.get() || self.done.get() {
                return false;
            }
            let mut buf = vec![0u8; self.bytes_per_tick];
            match self.reader.borrow_mut().read(&mut buf) {
                Ok(0) => self.done.set(true),
                Ok(n) => self.pulled.set(self.pulled.get() + n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => self.done.set(true),
            }
            !self.done.get()
        }

        fn position(&self) -> usize {
            self.pulled.get()
        }

        fn buffered_byte_count(&self) -> usize {
            self.queued.min(self.pulled.get())
        }

        fn close(&mut self) {
            self.closed.set(true);
        }
    }

    struct FakeContext {
        bytes_per_tick: usize,
        queued: usize,
        closed: Rc<Cell<bool>>,
    }

    impl OutputContext for FakeContext {
        type Player = FakePlayer;

        fn new_player(&self, source: Box<dyn Read + Send>) -> Result<FakePlayer> {
            Ok(FakePlayer {
                reader: RefCell::new(source),
                bytes_per_tick: self.bytes_per_tick,
                queued: self.queued,
                pulled: Cell::new(0),
                done: Cell::new(false),
                closed: Rc::clone(&self.closed),
            })
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        bytes_per_tick: usize,
        queued: usize,
        created: RefCell<Option<OutputSpec>>,
        closed: Rc<Cell<bool>>,
    }

    impl FakeBackend {
        fn new(bytes_per_tick: usize) -> Self {
            Self {
                bytes_per_tick,
                ..Self::default()
            }
        }
    }

    impl OutputBackend for FakeBackend {
        type Context = FakeContext;

        fn create(&self, spec: OutputSpec) -> Result<FakeContext> {
            *self.created.borrow_mut() = Some(spec);
            Ok(FakeContext {
                bytes_per_tick: self.bytes_per_tick,
                queued: self.queued,
                closed: Rc::clone(&self.closed),
            })
        }
    }

    fn loaded_stream(bytes: Vec<u8>) -> WavStream {
        let buffer = StreamBuffer::new();
        buffer.append(bytes);
        buffer.finish(Terminal::Eof);
        WavStream::from_buffer(buffer)
    }

    fn options() -> PlaybackOptions {
        PlaybackOptions {
            tick_interval: Duration::ZERO,
            ..PlaybackOptions::default()
        }
    }

    /// 1000 full-scale samples followed by 1000 silent ones.
    fn loud_then_quiet() -> Vec<u8> {
        let mut samples = vec![i16::MAX; 1000];
        samples.extend(std::iter::repeat(0).take(1000));
        wav_bytes(1, 8_000, 16, &samples)
    }

    #[test]
    fn test_reports_amplitude_until_finished() {
        let stream = loaded_stream(loud_then_quiet());
        let backend = FakeBackend::new(400);

        let mut values = Vec::new();
        play_with_callback(&backend, &stream, &options(), |amp| {
            values.push(amp);
            Ok(())
        })
        .unwrap();

        // 4044 bytes pulled 400 at a time: ten full ticks plus the 44-byte tail
        assert_eq!(values.len(), 11);
        assert_eq!(values[0], 1.0);
        assert_eq!(values[4], 1.0);
        assert_eq!(values[5], 0.0);
        assert_eq!(*values.last().unwrap(), 0.0);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));

        assert!(backend.closed.get());
        let spec = backend.created.borrow().unwrap();
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.format, AudioFormat::PcmS16Le);
        assert_eq!(spec.data_offset, 44);
    }

    #[test]
    fn test_queued_bytes_shift_the_sampled_position() {
        let stream = loaded_stream(loud_then_quiet());
        let backend = FakeBackend {
            bytes_per_tick: 400,
            queued: 1200,
            ..FakeBackend::default()
        };

        let mut values = Vec::new();
        play_with_callback(&backend, &stream, &options(), |amp| {
            values.push(amp);
            Ok(())
        })
        .unwrap();

        // Audible position lags three ticks behind, so loudness persists longer
        assert_eq!(values[7], 1.0);
        assert_eq!(values[8], 0.0);
    }

    #[test]
    fn test_callback_error_aborts_and_closes_player() {
        let stream = loaded_stream(loud_then_quiet());
        let backend = FakeBackend::new(100);

        let mut calls = 0;
        let err = play_with_callback(&backend, &stream, &options(), |_| {
            calls += 1;
            if calls == 3 {
                Err(anyhow!("terminal went away"))
            } else {
                Ok(())
            }
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert!(format!("{err:#}").contains("terminal went away"));
        assert!(backend.closed.get());
    }

    #[test]
    fn test_unsupported_format_never_opens_output() {
        let stream = loaded_stream(wav_bytes(1, 8_000, 8, &[0; 16]));
        let backend = FakeBackend::new(100);

        let err = play_with_callback(&backend, &stream, &options(), |_| Ok(())).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::UnsupportedFormat(_))
        ));
        assert!(backend.created.borrow().is_none());
    }

    #[test]
    fn test_incomplete_header_never_opens_output() {
        let stream = loaded_stream(b"RIFF".to_vec());
        let backend = FakeBackend::new(100);

        assert!(play_with_callback(&backend, &stream, &options(), |_| Ok(())).is_err());
        assert!(backend.created.borrow().is_none());
    }

    /// Delegates to a WAV stream but fails every amplitude query.
    struct BrokenSampler(WavStream);

    impl StreamSource for BrokenSampler {
        fn sample_rate(&self) -> Option<u32> {
            self.0.sample_rate()
        }
        fn channel_count(&self) -> Option<u16> {
            self.0.channel_count()
        }
        fn format(&self) -> std::result::Result<AudioFormat, StreamError> {
            self.0.format()
        }
        fn data_offset(&self) -> usize {
            self.0.data_offset()
        }
        fn read_sequential(&self, buf: &mut [u8]) -> std::result::Result<usize, StreamError> {
            self.0.read_sequential(buf)
        }
        fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
            self.0.read_at(buf, offset)
        }
        fn amplitude_at_pos(&self, _: usize) -> std::result::Result<f64, StreamError> {
            Err(StreamError::Closed)
        }
        fn bytes_available(&self) -> usize {
            self.0.bytes_available()
        }
        fn position(&self) -> usize {
            self.0.position()
        }
        fn wait_until_buffered(
            &self,
            wanted: usize,
            timeout: Duration,
        ) -> std::result::Result<usize, StreamError> {
            self.0.wait_until_buffered(wanted, timeout)
        }
        fn sequential_reader(&self) -> Box<dyn Read + Send> {
            self.0.sequential_reader()
        }
        fn close(&self) {
            self.0.close()
        }
    }

    #[test]
    fn test_sampler_error_other_than_end_of_stream_propagates() {
        let source = BrokenSampler(loaded_stream(loud_then_quiet()));
        let backend = FakeBackend::new(400);

        let mut calls = 0;
        let err = play_with_callback(&backend, &source, &options(), |_| {
            calls += 1;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(calls, 0);
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::Closed)
        ));
        assert!(backend.closed.get());
    }
}
