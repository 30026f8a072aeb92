//! Append-only byte store shared between a fill thread and its readers.
//!
//! The fill thread is the only writer. Readers either consume bytes in order
//! through the sequential cursor (the audio output does this) or peek at any
//! offset that has already arrived (header decoding, amplitude sampling).
//! No read ever waits for data: callers see whatever has been published so far.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::{Result, StreamError, Terminal};

/// Size of each blocking read issued against the underlying source.
pub const FILL_CHUNK_SIZE: usize = 128 * 1024;

#[derive(Default)]
struct State {
    chunks: Vec<Box<[u8]>>,
    available: usize,
    cursor: usize,
    terminal: Option<Terminal>,
}

impl State {
    /// Copies bytes starting at `offset` into `buf`, walking the chunk list.
    fn copy_at(&self, buf: &mut [u8], offset: usize) -> usize {
        if offset >= self.available || buf.is_empty() {
            return 0;
        }

        let mut chunk_start = 0;
        let mut pos = offset;
        let mut written = 0;
        for chunk in &self.chunks {
            let chunk_end = chunk_start + chunk.len();
            if pos < chunk_end {
                let from = pos - chunk_start;
                let n = (chunk.len() - from).min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&chunk[from..from + n]);
                written += n;
                pos += n;
                if written == buf.len() {
                    break;
                }
            }
            chunk_start = chunk_end;
        }

        written
    }
}

struct Shared {
    state: Mutex<State>,
    grown: Condvar,
}

/// Thread-safe growing buffer with a sequential cursor and random-offset reads.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct StreamBuffer {
    shared: Arc<Shared>,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                grown: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes one chunk. Returns `false` once the buffer has been closed,
    /// which tells the fill thread to stop.
    pub(crate) fn append(&self, chunk: Vec<u8>) -> bool {
        let mut state = self.lock();
        if state.terminal == Some(Terminal::Closed) {
            return false;
        }
        if !chunk.is_empty() {
            state.available += chunk.len();
            state.chunks.push(chunk.into_boxed_slice());
            self.shared.grown.notify_all();
        }
        true
    }

    /// Records why no more data will arrive. Only the first call has an effect.
    pub(crate) fn finish(&self, terminal: Terminal) {
        let mut state = self.lock();
        if state.terminal.is_none() {
            state.terminal = Some(terminal);
            self.shared.grown.notify_all();
        }
    }

    /// Reads from the sequential cursor and advances it by the bytes returned.
    ///
    /// A short read with no terminal state is not an error: `Ok(0)` means
    /// nothing new has arrived yet. Once the stream has ended, a short read that
    /// still returned some bytes is reported as [`StreamError::ShortRead`]
    /// (the cursor has moved by `read`), and a read returning nothing yields
    /// the terminal error itself.
    pub fn read_sequential(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.lock();
        let cursor = state.cursor;
        let read = state.copy_at(buf, cursor);
        state.cursor += read;

        if read == buf.len() {
            return Ok(read);
        }

        match &state.terminal {
            None => Ok(read),
            Some(terminal) if read == 0 => Err(terminal.to_error()),
            Some(terminal) => Err(StreamError::ShortRead {
                read,
                requested: buf.len(),
                cause: terminal.clone(),
            }),
        }
    }

    /// Copies up to `buf.len()` bytes at `offset` without touching the cursor.
    /// Returns 0 when `offset` is at or beyond the available data.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.lock().copy_at(buf, offset)
    }

    pub fn bytes_available(&self) -> usize {
        self.lock().available
    }

    /// Current sequential cursor.
    pub fn position(&self) -> usize {
        self.lock().cursor
    }

    #[cfg(test)]
    pub fn terminal(&self) -> Option<Terminal> {
        self.lock().terminal.clone()
    }

    /// Marks the buffer closed. Idempotent; an earlier terminal state is kept.
    ///
    /// The source itself is owned by the fill thread, which drops it the next
    /// time it looks at the buffer.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Closed);
            self.shared.grown.notify_all();
            tracing::debug!(
                "Stream buffer closed at {} of {} bytes",
                state.cursor,
                state.available
            );
        }
    }

    /// Blocks the caller until at least `wanted` bytes are buffered.
    ///
    /// Returns early with whatever is available if the source reached its end.
    /// Returns the terminal error if the stream was closed or the source
    /// failed first, and [`StreamError::NotReady`] when `timeout` runs out.
    pub fn wait_until_buffered(&self, wanted: usize, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.available >= wanted {
                return Ok(state.available);
            }
            match &state.terminal {
                Some(Terminal::Eof) => return Ok(state.available),
                Some(terminal) => return Err(terminal.to_error()),
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StreamError::NotReady {
                    buffered: state.available,
                    wanted,
                });
            }

            let (guard, _) = self
                .shared
                .grown
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// A `Read` adapter over the sequential cursor, for handing to an output.
    pub fn sequential_reader(&self) -> SequentialReader {
        SequentialReader {
            buffer: self.clone(),
        }
    }
}

/// `std::io::Read` view of a [`StreamBuffer`]'s sequential cursor.
///
/// Reports `WouldBlock` when no bytes have arrived yet, `Ok(0)` at a clean end
/// of stream, and any other terminal state as an I/O error.
pub struct SequentialReader {
    buffer: StreamBuffer,
}

impl Read for SequentialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.buffer.read_sequential(buf) {
            Ok(0) => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(StreamError::ShortRead { read, .. }) => Ok(read),
            Err(StreamError::EndOfStream) => Ok(0),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

/// Starts the fill thread: reads `source` in [`FILL_CHUNK_SIZE`] blocks and
/// appends them until the source ends, fails, or the buffer is closed.
///
/// The source is dropped exactly once, when the thread exits.
pub(crate) fn spawn_fill<R>(buffer: StreamBuffer, mut source: R) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("say-fill".to_string())
        .spawn(move || {
            loop {
                let mut chunk = vec![0u8; FILL_CHUNK_SIZE];
                match source.read(&mut chunk) {
                    Ok(0) => {
                        buffer.finish(Terminal::Eof);
                        tracing::debug!(
                            "Source exhausted after {} bytes",
                            buffer.bytes_available()
                        );
                        break;
                    }
                    Ok(n) => {
                        chunk.truncate(n);
                        if !buffer.append(chunk) {
                            tracing::debug!("Fill thread observed close, stopping");
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("Source read failed: {}", e);
                        buffer.finish(Terminal::from_io(&e));
                        break;
                    }
                }
            }
            drop(source);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn buffer_with_chunks(sizes: &[usize]) -> (StreamBuffer, Vec<u8>) {
        let total: usize = sizes.iter().sum();
        let data = pattern(total);
        let buffer = StreamBuffer::new();
        let mut start = 0;
        for &size in sizes {
            buffer.append(data[start..start + size].to_vec());
            start += size;
        }
        (buffer, data)
    }

    #[test]
    fn test_read_at_matches_appended_data_across_chunks() {
        let (buffer, data) = buffer_with_chunks(&[3, 1, 10, 7, 2]);
        let available = buffer.bytes_available();
        assert_eq!(available, data.len());

        for len in [1, 4, 9, 50] {
            for offset in 0..=available {
                let mut buf = vec![0u8; len];
                let n = buffer.read_at(&mut buf, offset);
                assert_eq!(n, len.min(available - offset), "len {len} offset {offset}");
                assert_eq!(&buf[..n], &data[offset..offset + n]);
            }
        }
    }

    #[test]
    fn test_read_at_beyond_available_returns_zero() {
        let (buffer, _) = buffer_with_chunks(&[8]);
        let mut buf = [0u8; 4];
        assert_eq!(buffer.read_at(&mut buf, 8), 0);
        assert_eq!(buffer.read_at(&mut buf, 100), 0);
        assert_eq!(buffer.position(), 0);
    }

    #[test]
    fn test_read_sequential_without_data_is_not_an_error() {
        let buffer = StreamBuffer::new();
        let mut buf = [0u8; 16];
        assert_eq!(buffer.read_sequential(&mut buf).unwrap(), 0);

        buffer.append(vec![1, 2, 3]);
        assert_eq!(buffer.read_sequential(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(buffer.position(), 3);
    }

    #[test]
    fn test_short_read_after_end_carries_terminal() {
        let (buffer, _) = buffer_with_chunks(&[5]);
        buffer.finish(Terminal::Eof);

        let mut buf = [0u8; 8];
        match buffer.read_sequential(&mut buf) {
            Err(StreamError::ShortRead {
                read,
                requested,
                cause,
            }) => {
                assert_eq!(read, 5);
                assert_eq!(requested, 8);
                assert_eq!(cause, Terminal::Eof);
            }
            other => panic!("expected short read, got {other:?}"),
        }
        assert_eq!(buffer.position(), 5);
        assert!(matches!(
            buffer.read_sequential(&mut buf),
            Err(StreamError::EndOfStream)
        ));
    }

    #[test]
    fn test_full_read_reports_no_error_even_after_end() {
        let (buffer, data) = buffer_with_chunks(&[4, 4]);
        buffer.finish(Terminal::Eof);
        let mut buf = [0u8; 8];
        assert_eq!(buffer.read_sequential(&mut buf).unwrap(), 8);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn test_first_terminal_wins() {
        let buffer = StreamBuffer::new();
        buffer.finish(Terminal::Eof);
        buffer.close();
        buffer.finish(Terminal::Failed {
            kind: io::ErrorKind::Other,
            message: "late".to_string(),
        });
        assert_eq!(buffer.terminal(), Some(Terminal::Eof));
    }

    #[test]
    fn test_sequential_reads_never_skip_or_duplicate_with_concurrent_appends() {
        let data = pattern(20_000);
        let buffer = StreamBuffer::new();

        let writer = {
            let buffer = buffer.clone();
            let data = data.clone();
            thread::spawn(move || {
                let mut start = 0;
                let mut size = 1;
                while start < data.len() {
                    let end = (start + size).min(data.len());
                    buffer.append(data[start..end].to_vec());
                    start = end;
                    size = size * 7 % 997 + 1;
                    if size % 5 == 0 {
                        thread::yield_now();
                    }
                }
                buffer.finish(Terminal::Eof);
            })
        };

        let mut collected = Vec::new();
        let mut buf = [0u8; 37];
        loop {
            match buffer.read_sequential(&mut buf) {
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(StreamError::ShortRead { read, .. }) => {
                    collected.extend_from_slice(&buf[..read])
                }
                Err(StreamError::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert_eq!(buffer.position(), collected.len());
        }

        writer.join().unwrap();
        assert_eq!(collected, data);
    }

    #[test]
    fn test_bytes_available_is_monotonic_while_filling() {
        let data = pattern(3 * FILL_CHUNK_SIZE + 17);
        let buffer = StreamBuffer::new();
        let handle = spawn_fill(buffer.clone(), Cursor::new(data.clone())).unwrap();

        let mut last = 0;
        while buffer.terminal().is_none() {
            let now = buffer.bytes_available();
            assert!(now >= last);
            last = now;
        }
        handle.join().unwrap();
        assert!(buffer.bytes_available() >= last);
        assert_eq!(buffer.bytes_available(), data.len());
    }

    #[test]
    fn test_wait_until_buffered_returns_at_end_of_small_source() {
        let buffer = StreamBuffer::new();
        let handle = spawn_fill(buffer.clone(), Cursor::new(vec![7u8; 10])).unwrap();

        let available = buffer
            .wait_until_buffered(1000, Duration::from_secs(5))
            .unwrap();
        assert_eq!(available, 10);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_until_buffered_times_out_without_data() {
        let buffer = StreamBuffer::new();
        let err = buffer
            .wait_until_buffered(44, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::NotReady {
                buffered: 0,
                wanted: 44
            }
        ));
    }

    #[test]
    fn test_source_failure_is_stored() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"))
            }
        }

        let buffer = StreamBuffer::new();
        spawn_fill(buffer.clone(), Failing).unwrap().join().unwrap();

        let mut buf = [0u8; 4];
        match buffer.read_sequential(&mut buf) {
            Err(StreamError::Source { kind, .. }) => assert_eq!(kind, io::ErrorKind::BrokenPipe),
            other => panic!("expected source error, got {other:?}"),
        }
    }

    /// Endless one-byte source that counts how often it gets dropped.
    struct Trickle {
        drops: Arc<AtomicUsize>,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(1));
            buf[0] = 0xAB;
            Ok(1)
        }
    }

    impl Drop for Trickle {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_close_is_idempotent_and_releases_source_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let buffer = StreamBuffer::new();
        let handle = spawn_fill(
            buffer.clone(),
            Trickle {
                drops: drops.clone(),
            },
        )
        .unwrap();

        buffer.wait_until_buffered(4, Duration::from_secs(5)).unwrap();
        buffer.close();
        buffer.close();
        handle.join().unwrap();
        buffer.close();

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.terminal(), Some(Terminal::Closed));
    }

    #[test]
    fn test_sequential_reader_maps_states_to_io() {
        let buffer = StreamBuffer::new();
        let mut reader = buffer.sequential_reader();
        let mut buf = [0u8; 4];

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        buffer.append(vec![1, 2]);
        buffer.finish(Terminal::Eof);
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
