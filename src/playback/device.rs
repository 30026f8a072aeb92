//! Audio output through cpal.
//!
//! A feeder thread pulls bytes from the stream's sequential reader, decodes
//! them into 16-bit samples and queues them in a ring buffer that the cpal
//! output callback drains. Position and buffered counts are tracked with
//! atomics so the driver can poll them from its own thread.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::sink::{OutputBackend, OutputContext, OutputSpec, Player};

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Bytes requested from the source per feeder iteration.
const FEED_CHUNK: usize = 16 * 1024;
/// Pause when the source has nothing new or the queue is full.
const FEED_IDLE: Duration = Duration::from_millis(5);

/// Opens cpal output devices by name, index or `"default"`.
pub struct CpalBackend {
    device_name: String,
}

impl CpalBackend {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }
}

impl OutputBackend for CpalBackend {
    type Context = CpalContext;

    fn create(&self, spec: OutputSpec) -> Result<CpalContext> {
        let device = suppress_alsa_warnings(|| {
            let host = cpal::default_host();

            if self.device_name == "default" {
                host.default_output_device()
                    .ok_or_else(|| anyhow!("No audio output device available"))
            } else {
                find_device_by_name(&host, &self.device_name)
            }
        })?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown device".to_string());
        let sample_format = device.default_output_config()?.sample_format();

        tracing::info!(
            "Output device: {} ({}Hz, {} channels, device sample format {:?})",
            device_name,
            spec.sample_rate,
            spec.channels,
            sample_format
        );

        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(CpalContext {
            device,
            config,
            sample_format,
            spec,
        })
    }
}

/// An output device configured for one stream format.
pub struct CpalContext {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
    spec: OutputSpec,
}

impl OutputContext for CpalContext {
    type Player = CpalPlayer;

    fn new_player(&self, source: Box<dyn Read + Send>) -> Result<CpalPlayer> {
        // Roughly a quarter second of audio
        let capacity = (self.spec.sample_rate as usize * usize::from(self.spec.channels) / 4)
            .max(FEED_CHUNK);
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        let state = Arc::new(PlayerState::default());

        let stream = match self.sample_format {
            SampleFormat::F32 => build_stream::<f32>(&self.device, &self.config, consumer, &state),
            SampleFormat::I16 => build_stream::<i16>(&self.device, &self.config, consumer, &state),
            SampleFormat::U16 => build_stream::<u16>(&self.device, &self.config, consumer, &state),
            other => Err(anyhow!("Unsupported device sample format: {other:?}")),
        }?;

        let feeder = spawn_feeder(
            source,
            producer,
            self.spec.data_offset,
            usize::from(self.spec.channels),
            Arc::clone(&state),
        )?;

        Ok(CpalPlayer {
            stream: Some(stream),
            feeder: Some(feeder),
            state,
            bytes_per_sample: self.spec.format.bytes_per_sample(),
            started: false,
        })
    }
}

#[derive(Default)]
struct PlayerState {
    /// Bytes pulled from the source, header included
    position: AtomicUsize,
    /// Samples queued by the feeder
    pushed: AtomicUsize,
    /// Samples handed to the device
    played: AtomicUsize,
    /// Bytes pulled but not queued yet (an incomplete frame or odd byte)
    held: AtomicUsize,
    source_done: AtomicBool,
    closed: AtomicBool,
    failed: AtomicBool,
}

impl PlayerState {
    fn buffered_samples(&self) -> usize {
        let played = self.played.load(Ordering::Acquire);
        self.pushed.load(Ordering::Acquire).saturating_sub(played)
    }
}

/// Plays one byte source on a cpal output stream.
pub struct CpalPlayer {
    stream: Option<cpal::Stream>,
    feeder: Option<JoinHandle<()>>,
    state: Arc<PlayerState>,
    bytes_per_sample: usize,
    started: bool,
}

impl Player for CpalPlayer {
    fn play(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| anyhow!("Player already closed"))?;
        stream.play()?;
        self.started = true;
        tracing::debug!("Output stream started");
        Ok(())
    }

    fn is_playing(&self) -> bool {
        if !self.started
            || self.state.closed.load(Ordering::Acquire)
            || self.state.failed.load(Ordering::Acquire)
        {
            return false;
        }
        !(self.state.source_done.load(Ordering::Acquire) && self.state.buffered_samples() == 0)
    }

    fn position(&self) -> usize {
        self.state.position.load(Ordering::Acquire)
    }

    fn buffered_byte_count(&self) -> usize {
        self.state.buffered_samples() * self.bytes_per_sample
            + self.state.held.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stream = None;
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                tracing::warn!("Feeder thread panicked");
            }
        }
        tracing::debug!(
            "Output closed after {} bytes",
            self.state.position.load(Ordering::Acquire)
        );
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds an output stream that converts queued `i16` samples to `T`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<i16>,
    state: &Arc<PlayerState>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels);
    let callback_state = Arc::clone(state);
    let error_state = Arc::clone(state);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let played = fill_frames(&mut consumer, data, channels);
            callback_state.played.fetch_add(played, Ordering::AcqRel);
        },
        move |err| {
            tracing::error!("Audio output error: {}", err);
            error_state.failed.store(true, Ordering::Release);
        },
        None,
    )?;

    Ok(stream)
}

/// Fills `data` frame by frame from the queue. A frame is only taken when
/// all of its samples are queued; otherwise it is written as silence, so an
/// underrun never shifts samples onto another channel.
///
/// Returns the number of samples taken from the queue.
fn fill_frames<C, T>(consumer: &mut C, data: &mut [T], channels: usize) -> usize
where
    C: Consumer<Item = i16>,
    T: Sample + FromSample<i16>,
{
    let channels = channels.max(1);
    let mut played = 0;
    for frame in data.chunks_mut(channels) {
        if frame.len() == channels && consumer.occupied_len() >= channels {
            for out in frame.iter_mut() {
                *out = consumer
                    .try_pop()
                    .map_or(T::EQUILIBRIUM, |sample| T::from_sample(sample));
            }
            played += channels;
        } else {
            frame.fill(T::EQUILIBRIUM);
        }
    }
    played
}

/// Queues as many whole frames from `pending` as fit, leaving the rest
/// (including any incomplete trailing frame) in `pending`.
///
/// Returns the number of samples queued.
fn push_frames<P>(producer: &mut P, pending: &mut Vec<i16>, channels: usize) -> usize
where
    P: Producer<Item = i16>,
{
    let channels = channels.max(1);
    let frames = (pending.len() / channels).min(producer.vacant_len() / channels);
    if frames == 0 {
        return 0;
    }

    let queued = producer.push_slice(&pending[..frames * channels]);
    pending.drain(..queued);
    queued
}

/// Bytes pulled from the source that are not in the sample queue yet.
fn held_bytes(pending: &[i16], carry: Option<u8>) -> usize {
    pending.len() * 2 + usize::from(carry.is_some())
}

/// Starts the thread that moves bytes from `source` into the sample queue.
///
/// The first `data_offset` bytes are counted in the position but not played.
/// Samples are queued in whole frames of `channels`; an incomplete frame
/// waits for the next read.
fn spawn_feeder(
    mut source: Box<dyn Read + Send>,
    mut producer: HeapProd<i16>,
    data_offset: usize,
    channels: usize,
    state: Arc<PlayerState>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("say-feeder".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; FEED_CHUNK];
            let mut pending: Vec<i16> = Vec::with_capacity(FEED_CHUNK / 2 + channels);
            let mut carry: Option<u8> = None;
            let mut pulled = 0usize;
            let mut source_done = false;

            while !state.closed.load(Ordering::Acquire) {
                let queued = push_frames(&mut producer, &mut pending, channels);
                if queued > 0 {
                    state.pushed.fetch_add(queued, Ordering::AcqRel);
                    state
                        .held
                        .store(held_bytes(&pending, carry), Ordering::Release);
                }

                let whole_frames_waiting = pending.len() >= channels;
                if source_done {
                    if !whole_frames_waiting {
                        break;
                    }
                    thread::sleep(FEED_IDLE);
                    continue;
                }
                if whole_frames_waiting {
                    thread::sleep(FEED_IDLE);
                    continue;
                }

                match source.read(&mut buf) {
                    Ok(0) => source_done = true,
                    Ok(n) => {
                        let skip = data_offset.saturating_sub(pulled).min(n);
                        pulled += n;

                        decode_samples(&buf[skip..n], &mut carry, &mut pending);
                        state
                            .held
                            .store(held_bytes(&pending, carry), Ordering::Release);
                        state.position.store(pulled, Ordering::Release);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(FEED_IDLE),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!("Playback source failed: {}", e);
                        source_done = true;
                    }
                }
            }

            let leftover = held_bytes(&pending, carry);
            if leftover > 0 {
                tracing::debug!("Discarding {} bytes of an incomplete final frame", leftover);
            }
            state.held.store(0, Ordering::Release);
            state.source_done.store(true, Ordering::Release);
            tracing::debug!("Feeder finished after {} bytes", pulled);
        })?;

    Ok(handle)
}

/// Decodes little-endian sample pairs, carrying an odd trailing byte over to
/// the next call.
fn decode_samples(bytes: &[u8], carry: &mut Option<u8>, out: &mut Vec<i16>) {
    let mut rest = bytes;
    if let Some(low) = carry.take() {
        match rest.split_first() {
            Some((&high, tail)) => {
                out.push(i16::from_le_bytes([low, high]));
                rest = tail;
            }
            None => {
                *carry = Some(low);
                return;
            }
        }
    }

    let mut pairs = rest.chunks_exact(2);
    out.extend(pairs.by_ref().map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
    *carry = pairs.remainder().first().copied();
}

/// Output devices that report a name, in host order. The position in this
/// list is the device ID shown by `say list-devices`.
///
/// # Errors
/// - If the host cannot enumerate devices
pub(crate) fn named_output_devices(host: &cpal::Host) -> Result<Vec<(cpal::Device, String)>> {
    let devices = host
        .output_devices()
        .map_err(|e| anyhow!("Failed to enumerate audio devices: {e}"))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            Some((device, name))
        })
        .collect())
}

/// Finds an audio output device by name or numeric index.
///
/// # Errors
/// - If no device with the specified name/index is found
fn find_device_by_name(host: &cpal::Host, device_spec: &str) -> Result<cpal::Device> {
    select_device(named_output_devices(host)?, device_spec)
}

/// Picks an entry by numeric index or exact name.
fn select_device<D>(devices: Vec<(D, String)>, device_spec: &str) -> Result<D> {
    if let Ok(index) = device_spec.parse::<usize>() {
        let count = devices.len();
        return devices
            .into_iter()
            .nth(index)
            .map(|(device, _)| device)
            .ok_or_else(|| {
                anyhow!(
                    "Device index {} is out of range (0-{})",
                    index,
                    count.saturating_sub(1)
                )
            });
    }

    devices
        .into_iter()
        .find(|(_, name)| name == device_spec)
        .map(|(device, _)| device)
        .ok_or_else(|| {
            anyhow!(
                "Audio output device '{device_spec}' not found. Use 'say list-devices' to see available devices."
            )
        })
}

/// Temporarily redirects stderr to /dev/null to suppress ALSA library warnings on Linux.
#[cfg(target_os = "linux")]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let dev_null = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .map_err(|e| anyhow!("Failed to open /dev/null: {e}"))?;

    let dev_null_fd = dev_null.as_raw_fd();

    let old_stderr = unsafe { libc::dup(libc::STDERR_FILENO) };
    if old_stderr == -1 {
        return Err(anyhow!("Failed to duplicate stderr"));
    }

    let redirect_result = unsafe { libc::dup2(dev_null_fd, libc::STDERR_FILENO) };
    if redirect_result == -1 {
        unsafe { libc::close(old_stderr) };
        return Err(anyhow!("Failed to redirect stderr"));
    }

    let result = f();

    unsafe {
        libc::dup2(old_stderr, libc::STDERR_FILENO);
        libc::close(old_stderr);
    }

    result
}

/// On non-Linux platforms there is no ALSA, so nothing to suppress.
#[cfg(not(target_os = "linux"))]
pub(crate) fn suppress_alsa_warnings<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f()
}
