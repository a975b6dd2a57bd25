//! Playback of a stored memo.
//!
//! The whole file is decoded up front. The audio callback copies the next
//! slice of samples into each output block, scaled by the live volume, and
//! pads with silence past the end. The callback never stops the stream;
//! end-of-data is detected by the control thread polling `is_finished`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use super::backend::{AudioBackend, BLOCK_FRAMES, DeviceInfo, Direction, StreamHandle, StreamParams};
use super::util::AtomicF32;
use super::wav::{self, AudioFormat};
use crate::error::{Error, Result};

/// Decoded samples plus the state the audio thread advances.
#[derive(Debug)]
struct PlaybackBuffer {
    samples: Vec<i16>,  // immutable once loaded
    cursor: AtomicUsize, // written only by the audio thread
    volume: AtomicF32,   // written only by the control thread
}

/// Fill one output block from `samples`, starting at `cursor`.
///
/// Each slot takes the next sample scaled by `volume` and clamped to the i16
/// range, or silence once the samples are exhausted. The cursor advances by
/// one per sample copied and never passes `samples.len()`.
pub fn fill_block(samples: &[i16], cursor: &AtomicUsize, volume: f32, out: &mut [i16]) {
    let mut position = cursor.load(Ordering::Relaxed);

    for slot in out.iter_mut() {
        *slot = match samples.get(position) {
            Some(&sample) => {
                position += 1;
                scale_sample(sample, volume)
            }
            None => 0,
        };
    }

    cursor.store(position, Ordering::Release);
}

/// Apply volume to a sample, clamping instead of wrapping.
pub fn scale_sample(sample: i16, volume: f32) -> i16 {
    (sample as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// One decoded memo bound to an output stream.
pub struct PlaybackSession {
    stream: Box<dyn StreamHandle>,
    buffer: Arc<PlaybackBuffer>,
    format: AudioFormat,
    path: PathBuf,
}

impl PlaybackSession {
    /// Decode `path` and open an output stream at the file's own format.
    ///
    /// The stream is created but not started.
    pub fn open(backend: &dyn AudioBackend, device: &DeviceInfo, path: &Path, volume: f32) -> Result<Self> {
        if !device.supports(Direction::Output) {
            return Err(Error::DeviceUnavailable(Direction::Output));
        }

        let (format, samples) = wav::read_file(path)?;
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(Error::unreadable(path, "header declares zero sample rate or channels"));
        }

        debug!("Decoded {} samples ({} Hz, {} ch) from {}", samples.len(), format.sample_rate, format.channels, path.display());

        let buffer = Arc::new(PlaybackBuffer { samples, cursor: AtomicUsize::new(0), volume: AtomicF32::new(volume.clamp(0.0, 1.0)) });

        let params = StreamParams { sample_rate: format.sample_rate, channels: format.channels, block_frames: BLOCK_FRAMES };
        let callback_buffer = buffer.clone();
        let stream = backend.open_output_stream(
            device,
            params,
            Box::new(move |out: &mut [i16]| {
                let buffer = &callback_buffer;
                fill_block(&buffer.samples, &buffer.cursor, buffer.volume.load(), out);
            }),
        )?;

        Ok(Self { stream, buffer, format, path: path.to_path_buf() })
    }

    fn play(&self) -> Result<()> {
        self.stream.play()
    }

    fn pause(&self) -> Result<()> {
        self.stream.pause()
    }

    /// Samples consumed so far.
    pub fn cursor(&self) -> usize {
        self.buffer.cursor.load(Ordering::Acquire)
    }

    /// Total decoded samples.
    pub fn total_samples(&self) -> usize {
        self.buffer.samples.len()
    }

    /// True once every sample has been handed to the device.
    pub fn is_finished(&self) -> bool {
        self.cursor() >= self.total_samples()
    }

    /// Playback position in seconds.
    pub fn position_seconds(&self) -> f64 {
        let frames = self.cursor() / self.format.channels as usize;
        frames as f64 / self.format.sample_rate as f64
    }

    /// Total length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        let frames = self.total_samples() / self.format.channels as usize;
        frames as f64 / self.format.sample_rate as f64
    }

    pub fn set_volume(&self, volume: f32) {
        self.buffer.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Externally visible playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

#[derive(Default)]
enum PlayerState {
    #[default]
    Idle,
    Playing(PlaybackSession),
    Paused(PlaybackSession),
}

/// Playback state machine: `Idle -> Playing <-> Paused -> Idle`.
///
/// Pausing keeps the decoded buffer and cursor; stopping discards both.
#[derive(Default)]
pub struct Player {
    state: PlayerState,
}

impl Player {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playing `path`, replacing any current session.
    ///
    /// On failure the player is left idle.
    pub fn start(&mut self, backend: &dyn AudioBackend, device: &DeviceInfo, path: &Path, volume: f32) -> Result<()> {
        self.stop();

        let session = PlaybackSession::open(backend, device, path, volume)?;
        session.play()?;

        info!("Playback started: {} ({:.1}s)", path.display(), session.duration_seconds());
        self.state = PlayerState::Playing(session);
        Ok(())
    }

    /// Pause the stream, keeping the cursor. Returns false when not playing.
    pub fn pause(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            PlayerState::Playing(session) => {
                if let Err(e) = session.pause() {
                    warn!("Error pausing playback stream: {}", e);
                }
                info!("Playback paused at {:.1}s", session.position_seconds());
                self.state = PlayerState::Paused(session);
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Resume a paused session without re-decoding.
    ///
    /// Returns `Ok(false)` when nothing is paused. If the stream cannot be
    /// restarted the session is discarded.
    pub fn resume(&mut self) -> Result<bool> {
        match std::mem::take(&mut self.state) {
            PlayerState::Paused(session) => {
                session.play()?;
                info!("Playback resumed at {:.1}s", session.position_seconds());
                self.state = PlayerState::Playing(session);
                Ok(true)
            }
            other => {
                self.state = other;
                Ok(false)
            }
        }
    }

    /// Stop and release the stream and decoded buffer. Returns false when idle.
    pub fn stop(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            PlayerState::Playing(session) | PlayerState::Paused(session) => {
                if let Err(e) = session.pause() {
                    warn!("Error stopping playback stream: {}", e);
                }
                info!("Playback stopped: {}", session.path().display());
                drop(session);
                true
            }
            PlayerState::Idle => false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match self.state {
            PlayerState::Idle => PlaybackState::Idle,
            PlayerState::Playing(_) => PlaybackState::Playing,
            PlayerState::Paused(_) => PlaybackState::Paused,
        }
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        match &self.state {
            PlayerState::Playing(session) | PlayerState::Paused(session) => Some(session),
            PlayerState::Idle => None,
        }
    }

    /// Change the volume of the current session, if any. Takes effect on the
    /// next block.
    pub fn set_volume(&self, volume: f32) {
        if let Some(session) = self.session() {
            session.set_volume(volume);
        }
    }

    /// True while playing and every sample has been consumed.
    pub fn reached_end(&self) -> bool {
        matches!(&self.state, PlayerState::Playing(session) if session.is_finished())
    }
}
