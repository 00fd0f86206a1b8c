//! Streaming decode of a `Contents-<arch>.gz` body.

use flate2::read::GzDecoder;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use super::client::FetchError;
use crate::cache::PackageCount;
use crate::progress::ProgressSink;
use crate::signal::CancelToken;
use crate::stats::Tally;

/// Lines scanned between cancellation checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 1000;

/// Buffer size for the decompressed line reader.
const LINE_BUFFER_BYTES: usize = 1024 * 1024;

/// Longest accepted line of the decompressed index.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Read size of the body pump thread.
const PUMP_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks buffered between the pump thread and the scanner.
const PUMP_DEPTH: usize = 4;

/// Longest wait for the pump before the cancel token is polled again.
const PUMP_POLL: Duration = Duration::from_millis(50);

/// A body reader that gives up as soon as `cancel` fires.
///
/// A blocking socket read cannot be interrupted, so the wrapped reader is
/// drained on its own thread and handed over in chunks. When the token fires
/// while the pump is stuck in a read, the pump is abandoned; it exits once
/// its read returns or the process ends.
pub struct CancellableReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    cancel: CancelToken,
    finished: bool,
}

impl CancellableReader {
    /// Start pumping `inner` on a background thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn spawn<R: Read + Send + 'static>(mut inner: R, cancel: CancelToken) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(PUMP_DEPTH);
        thread::Builder::new()
            .name("pkgstats-body".to_string())
            .spawn(move || loop {
                let mut chunk = vec![0u8; PUMP_CHUNK_BYTES];
                match inner.read(&mut chunk) {
                    Ok(n) => {
                        chunk.truncate(n);
                        // an empty chunk marks end of stream
                        if tx.send(Ok(chunk)).is_err() || n == 0 {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            })?;
        Ok(Self {
            chunks: rx,
            pending: Vec::new(),
            offset: 0,
            cancel,
            finished: false,
        })
    }
}

impl Read for CancellableReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }
            self.cancel.check().map_err(io::Error::other)?;
            match self.chunks.recv_timeout(PUMP_POLL) {
                Ok(Ok(chunk)) => {
                    self.finished = chunk.is_empty();
                    self.pending = chunk;
                    self.offset = 0;
                }
                Ok(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.finished = true;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body reader stopped before end of stream",
                    ));
                }
            }
        }

        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Counts raw (compressed) bytes as they are read and reports them.
pub struct ProgressReader<'a, R> {
    inner: R,
    transferred: u64,
    sink: &'a dyn ProgressSink,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, sink: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            transferred: 0,
            sink,
        }
    }

    /// Bytes read so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.transferred += n as u64;
            self.sink.on_bytes(self.transferred);
        }
        Ok(n)
    }
}

/// Gunzip `reader` and aggregate its lines into sorted package counts.
///
/// `cancel` is polled every [`CANCEL_CHECK_INTERVAL`] lines and whenever a
/// read fails, so an interrupted transfer surfaces as
/// [`FetchError::Interrupted`] rather than a decode error.
///
/// # Errors
///
/// [`FetchError::Interrupted`] on cancellation or deadline expiry and
/// [`FetchError::Body`] if the stream cannot be read or decompressed.
pub fn scan_contents<R: Read>(reader: R, cancel: &CancelToken) -> Result<Vec<PackageCount>, FetchError> {
    let mut lines = BufReader::with_capacity(LINE_BUFFER_BYTES, GzDecoder::new(reader));
    let mut buf = Vec::with_capacity(256);
    let mut tally = Tally::new();
    let mut scanned: u64 = 0;

    loop {
        if scanned % CANCEL_CHECK_INTERVAL == 0 {
            if let Err(interrupt) = cancel.check() {
                log::info!("Download interrupted after {} lines: {}", scanned, interrupt);
                return Err(interrupt.into());
            }
        }

        buf.clear();
        let n = match (&mut lines).take(MAX_LINE_BYTES as u64 + 1).read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(e) => {
                cancel.check()?;
                return Err(FetchError::Body(e));
            }
        };
        if n == 0 {
            break;
        }
        if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
            return Err(FetchError::Body(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line {} is longer than {} bytes", scanned + 1, MAX_LINE_BYTES),
            )));
        }

        tally.process_line(&String::from_utf8_lossy(&buf));
        scanned += 1;
    }

    log::debug!(
        "Scanned {} lines, {} packages",
        scanned,
        tally.len()
    );
    Ok(tally.into_sorted())
}
