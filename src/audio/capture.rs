//! Audio capture into a WAV file.
//!
//! The backend's audio callback never touches the file. It pushes samples into
//! a lock-free ring buffer and updates level meters; a writer thread drains the
//! ring into the file and advances the byte counter. On stop the stream is
//! released first, the writer drains what is left, and the header's size
//! fields are patched to match the payload.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, BLOCK_FRAMES, DeviceInfo, Direction, StreamHandle, StreamParams};
use super::util::{AtomicF32, level_of};
use super::wav::{self, AudioFormat, HEADER_LEN};
use crate::error::{Error, Result};

/// Ring buffer capacity in samples (~3 seconds of 44.1 kHz stereo).
const CAPTURE_RING_SIZE: usize = 262144;

/// Samples drained from the ring per file write.
const WRITE_CHUNK: usize = 8192;

/// Level meters updated from the audio thread, read by the control thread.
#[derive(Debug, Default)]
pub struct LevelMeter {
    block_peak: AtomicF32,
    session_peak: AtomicF32,
    left: AtomicF32,
    right: AtomicF32,
}

/// Point-in-time copy of the level meters (all 0.0..=1.0).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub block_peak: f32,
    pub session_peak: f32,
    pub left: f32,
    pub right: f32,
}

impl LevelMeter {
    /// Update from one interleaved block.
    pub fn update(&self, block: &[i16], channels: usize) {
        if block.is_empty() {
            return;
        }

        let channels = channels.max(1);
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for frame in block.chunks(channels) {
            left = left.max(level_of(frame[0]));
            right = right.max(level_of(*frame.get(1).unwrap_or(&frame[0])));
        }

        let peak = left.max(right);
        self.block_peak.store(peak);
        self.left.store(left);
        self.right.store(right);
        if peak > self.session_peak.load() {
            self.session_peak.store(peak);
        }
    }

    pub fn snapshot(&self) -> Levels {
        Levels { block_peak: self.block_peak.load(), session_peak: self.session_peak.load(), left: self.left.load(), right: self.right.load() }
    }
}

/// Counters shared between the audio thread, the writer thread and the
/// control thread. Counters only ever increase.
#[derive(Debug, Default)]
struct CaptureShared {
    bytes_written: AtomicU64,
    dropped_samples: AtomicU64,
    write_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    levels: LevelMeter,
}

/// Result of finalizing a capture. Empty when no capture was open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedCapture {
    pub filename: String,
    pub size_bytes: u64,
    pub duration_seconds: f64,
}

/// One open recording.
pub struct CaptureSession {
    stream: Box<dyn StreamHandle>, // backend stream (closed on drop)
    file: File,                    // handle used for the final header patch
    path: PathBuf,
    format: AudioFormat,
    started_at: Instant,
    shared: Arc<CaptureShared>,
    finishing: Arc<AtomicBool>,
    writer: JoinHandle<()>,
}

impl CaptureSession {
    /// Open a recording on `device` writing to `path`.
    ///
    /// The device's preferred rate wins over the requested rate, and the channel
    /// count is the smaller of the device maximum and the requested count. On
    /// any failure nothing stays open and the partial file is removed.
    pub fn start(backend: &dyn AudioBackend, device: &DeviceInfo, requested: AudioFormat, path: &Path) -> Result<Self> {
        Self::start_with_sink(backend, device, requested, path, File::try_clone)
    }

    /// Like `start`, with the writer thread draining into the sink built by
    /// `make_sink` from the freshly created file.
    pub fn start_with_sink<W, F>(backend: &dyn AudioBackend, device: &DeviceInfo, requested: AudioFormat, path: &Path, make_sink: F) -> Result<Self>
    where
        W: Write + Send + 'static,
        F: FnOnce(&File) -> io::Result<W>,
    {
        if !device.supports(Direction::Input) {
            return Err(Error::DeviceUnavailable(Direction::Input));
        }

        let format = negotiate_format(device, requested);
        info!("Recording {} Hz, {} channel(s), {}-bit to {}", format.sample_rate, format.channels, format.bits_per_sample, path.display());

        let mut file = File::create(path).map_err(|e| Error::unreadable(path, e))?;

        match Self::open(backend, device, format, path, &mut file, make_sink) {
            Ok((stream, shared, finishing, writer)) => Ok(Self {
                stream,
                file,
                path: path.to_path_buf(),
                format,
                started_at: Instant::now(),
                shared,
                finishing,
                writer,
            }),
            Err(e) => {
                drop(file);
                if let Err(remove_err) = fs::remove_file(path) {
                    warn!("Failed to remove partial recording {}: {}", path.display(), remove_err);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn open<W, F>(
        backend: &dyn AudioBackend,
        device: &DeviceInfo,
        format: AudioFormat,
        path: &Path,
        file: &mut File,
        make_sink: F,
    ) -> Result<(Box<dyn StreamHandle>, Arc<CaptureShared>, Arc<AtomicBool>, JoinHandle<()>)>
    where
        W: Write + Send + 'static,
        F: FnOnce(&File) -> io::Result<W>,
    {
        // Placeholder size, patched on stop
        file.write_all(&wav::encode_header(&format, 0)).map_err(|e| Error::unreadable(path, e))?;
        let sink = make_sink(&*file).map_err(|e| Error::unreadable(path, e))?;

        let shared = Arc::new(CaptureShared::default());
        let finishing = Arc::new(AtomicBool::new(false));

        let ring = HeapRb::<i16>::new(CAPTURE_RING_SIZE);
        let (mut producer, consumer) = ring.split();

        let callback_shared = shared.clone();
        let channels = format.channels as usize;
        let params = StreamParams { sample_rate: format.sample_rate, channels: format.channels, block_frames: BLOCK_FRAMES };

        let stream = backend.open_input_stream(
            device,
            params,
            Box::new(move |block: &[i16]| {
                callback_shared.levels.update(block, channels);

                // Lock-free, non-blocking push
                let written = producer.push_slice(block);
                if written < block.len() {
                    let dropped = (block.len() - written) as u64;
                    let total = callback_shared.dropped_samples.fetch_add(dropped, Ordering::Relaxed);
                    if total == 0 {
                        tracing::warn!("Capture ring buffer full, dropping samples");
                    }
                }
            }),
        )?;

        stream.play()?;

        let writer = spawn_writer(consumer, sink, shared.clone(), finishing.clone()).map_err(Error::stream)?;

        Ok((stream, shared, finishing, writer))
    }

    /// Release the stream, drain pending samples, patch the header and close
    /// the file.
    pub fn stop(self) -> FinalizedCapture {
        let Self { stream, mut file, path, format, started_at, shared, finishing, writer } = self;

        // Close the stream first so no further blocks arrive
        if let Err(e) = stream.pause() {
            warn!("Error stopping capture stream: {}", e);
        }
        drop(stream);

        finishing.store(true, Ordering::Release);
        if writer.join().is_err() {
            error!("Capture writer thread panicked");
        }

        let file_size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("Failed to stat recording {}: {}", path.display(), e);
                HEADER_LEN as u64 + shared.bytes_written.load(Ordering::Relaxed)
            }
        };
        let data_size = file_size.saturating_sub(HEADER_LEN as u64);

        if let Err(e) = wav::patch_data_size(&mut file, declared_data_size(data_size)) {
            error!("Failed to patch WAV header of {}: {}", path.display(), e);
        }
        if let Err(e) = file.sync_all() {
            warn!("Failed to sync recording {}: {}", path.display(), e);
        }
        drop(file);

        let duration_seconds = format.duration_for(data_size).unwrap_or_else(|| {
            warn!("Degenerate format {:?}, using wall-clock duration", format);
            started_at.elapsed().as_secs_f64()
        });

        let dropped = shared.dropped_samples.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("Recording dropped {} samples (ring buffer overflow)", dropped);
        }

        info!("Recording finalized: {} ({} bytes, {:.2}s)", path.display(), file_size, duration_seconds);

        FinalizedCapture {
            filename: path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default(),
            size_bytes: file_size,
            duration_seconds,
        }
    }

    /// Payload bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Relaxed)
    }

    pub fn levels(&self) -> Levels {
        self.shared.levels.snapshot()
    }

    /// Take the most recent write error, if one happened since the last call.
    pub fn take_write_error(&self) -> Option<String> {
        self.shared.last_error.lock().take()
    }
}

/// Recording state machine: `Idle` or `Recording`.
#[derive(Default)]
pub struct Capturer {
    session: Option<CaptureSession>,
}

impl Capturer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording. Only one recording may be open at a time.
    pub fn start(&mut self, backend: &dyn AudioBackend, device: &DeviceInfo, requested: AudioFormat, path: &Path) -> Result<()> {
        self.start_with_sink(backend, device, requested, path, File::try_clone)
    }

    pub fn start_with_sink<W, F>(&mut self, backend: &dyn AudioBackend, device: &DeviceInfo, requested: AudioFormat, path: &Path, make_sink: F) -> Result<()>
    where
        W: Write + Send + 'static,
        F: FnOnce(&File) -> io::Result<W>,
    {
        if self.session.is_some() {
            return Err(Error::SessionActive("capture"));
        }
        self.session = Some(CaptureSession::start_with_sink(backend, device, requested, path, make_sink)?);
        Ok(())
    }

    /// Finalize the open recording. A no-op returning an empty payload when idle.
    pub fn stop(&mut self) -> FinalizedCapture {
        match self.session.take() {
            Some(session) => session.stop(),
            None => {
                debug!("Stop requested with no open capture");
                FinalizedCapture::default()
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("Capturer dropped while recording, finalizing");
            self.stop();
        }
    }
}

/// Pick the stream format for a device.
///
/// Device-preferred values take precedence over the requested ones.
pub fn negotiate_format(device: &DeviceInfo, requested: AudioFormat) -> AudioFormat {
    let sample_rate = if device.preferred_sample_rate > 0 { device.preferred_sample_rate } else { requested.sample_rate };
    let channels = match device.max_channels(Direction::Input) {
        0 => requested.channels,
        max => max.min(requested.channels),
    };
    debug!("Using {} input channel(s) (device max: {}, requested: {})", channels, device.max_input_channels, requested.channels);
    AudioFormat::pcm16(sample_rate, channels)
}

/// Value for the header's 32-bit size field. Payloads past 4 GiB saturate.
fn declared_data_size(data_size: u64) -> u32 {
    u32::try_from(data_size).unwrap_or_else(|_| {
        warn!("Recording payload of {} bytes exceeds the WAV size field, header declares {}", data_size, u32::MAX);
        u32::MAX
    })
}

/// Spawn the thread that drains the ring buffer into the sink.
///
/// Write errors are logged and recorded; the thread keeps draining so that
/// as much audio as possible survives.
fn spawn_writer<W: Write + Send + 'static>(mut consumer: ringbuf::HeapCons<i16>, mut sink: W, shared: Arc<CaptureShared>, finishing: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("capture-writer".to_string()).spawn(move || {
        let mut chunk = vec![0i16; WRITE_CHUNK];

        loop {
            // Read the flag before popping: once set, no more samples arrive
            let done = finishing.load(Ordering::Acquire);
            let read = consumer.pop_slice(&mut chunk);

            if read == 0 {
                if done {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
                continue;
            }

            let bytes = wav::samples_to_bytes(&chunk[..read]);
            match sink.write_all(&bytes) {
                Ok(()) => {
                    shared.bytes_written.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    let count = {
                        let mut last_error = shared.last_error.lock();
                        *last_error = Some(e.to_string());
                        shared.write_errors.fetch_add(1, Ordering::Relaxed)
                    };
                    if count.is_multiple_of(100) {
                        error!("Error writing audio data: {}", e);
                    }
                }
            }
        }

        if let Err(e) = sink.flush() {
            error!("Error flushing audio data: {}", e);
        }
        debug!("Capture writer thread exiting");
    })
}

#[cfg(test)]
pub mod testing {
    use std::io::{self, Write};

    /// Sink whose every write fails, as on a full disk.
    pub struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
