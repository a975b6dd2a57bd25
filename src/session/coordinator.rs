use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBackend, Capturer, DeviceInfo, Direction, Levels, PlaybackState, Player, select_device};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::memo::{self, MemoRecord, MemoStore, TEST_TONE_FILENAME};

/// Interval between coordinator polls.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long a notification stays visible.
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(3);

/// Period of the recording indicator animation, in ticks.
pub const PULSE_PERIOD: u32 = 20;

/// What the coordinator is doing, for display. Recording wins when a
/// recording and a playback are open at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Recording,
    Playing,
    Paused,
}

/// Transient message shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message: String,
    pub age: Duration, // advanced on each tick
}

/// Recording in progress, as seen by the control path.
struct PendingMemo {
    filename: String,
    created_at: OffsetDateTime,
}

/// Control-path owner of the capture and playback sessions and the memo
/// collection.
///
/// The audio threads only ever see the sessions' shared counters; everything
/// here runs on the control thread, one call at a time.
pub struct Coordinator<B: AudioBackend> {
    backend: B,
    settings: Settings,
    store: MemoStore,
    export_dir: PathBuf,

    capturer: Capturer,
    recording: Option<PendingMemo>,
    elapsed: Duration,
    pulse: u32,

    player: Player,
    playing_id: Option<String>,
    position: f64,

    notification: Option<Notification>,
}

impl<B: AudioBackend> Coordinator<B> {
    pub fn new(backend: B, settings: Settings, store: MemoStore, export_dir: PathBuf) -> Self {
        Self {
            backend,
            settings,
            store,
            export_dir,
            capturer: Capturer::new(),
            recording: None,
            elapsed: Duration::ZERO,
            pulse: 0,
            player: Player::new(),
            playing_id: None,
            position: 0.0,
            notification: None,
        }
    }

    // Capture

    /// Start recording a new memo into the memo directory.
    ///
    /// # Errors
    /// `SessionActive` if already recording, `DeviceUnavailable` if no input
    /// device exists, or any stream/file error from the capture session. In
    /// every case nothing is left open and a notification is raised.
    pub fn start_capture(&mut self) -> Result<()> {
        let result = self.try_start_capture();
        self.surface(result)
    }

    fn try_start_capture(&mut self) -> Result<()> {
        if self.capturer.is_recording() {
            return Err(Error::SessionActive("capture"));
        }

        let device = self.device_for(Direction::Input)?;
        let created_at = memo::now_local();
        let filename = self.store.unique_filename(created_at);
        let path = self.store.dir().join(&filename);

        self.capturer.start(&self.backend, &device, self.settings.audio_format(), &path)?;

        info!("🎙️  Recording to {}", filename);
        self.recording = Some(PendingMemo { filename, created_at });
        self.elapsed = Duration::ZERO;
        self.pulse = 0;
        Ok(())
    }

    /// Finalize the recording and add it to the collection, newest first.
    ///
    /// Returns `None` when nothing was recording. A metadata write failure is
    /// surfaced as a notification; the memo is kept in memory regardless.
    pub fn stop_capture(&mut self) -> Option<MemoRecord> {
        let pending = self.recording.take()?;
        let finalized = self.capturer.stop();
        self.pulse = 0;

        let display_name = Path::new(&pending.filename).file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| pending.filename.clone());

        let record = MemoRecord {
            id: memo::memo_id(pending.created_at),
            filename: pending.filename,
            display_name,
            duration_seconds: finalized.duration_seconds,
            created_at: pending.created_at,
            size_bytes: finalized.size_bytes,
            tags: Vec::new(),
            format_label: self.settings.default_format.to_string(),
        };

        info!("💾 Saved {} ({})", record.display_name, record.description());
        let result = self.store.prepend(record.clone());
        let _ = self.surface(result);
        Some(record)
    }

    // Playback

    /// Play a memo. Resumes instead if that memo is the one paused; any other
    /// open playback is stopped first.
    pub fn start_playback(&mut self, id: &str) -> Result<()> {
        let result = self.try_start_playback(id);
        self.surface(result)
    }

    fn try_start_playback(&mut self, id: &str) -> Result<()> {
        if self.player.state() == PlaybackState::Paused && self.playing_id.as_deref() == Some(id) {
            return self.resume_playback().map(|_| ());
        }

        let path = self.store.audio_path(id)?;
        let device = self.device_for(Direction::Output)?;

        self.playing_id = None;
        self.position = 0.0;
        self.player.start(&self.backend, &device, &path, self.settings.volume)?;
        self.playing_id = Some(id.to_string());
        Ok(())
    }

    /// Pause the current playback. Returns false when nothing is playing.
    pub fn pause_playback(&mut self) -> bool {
        self.player.pause()
    }

    /// Resume a paused playback. Returns `Ok(false)` when nothing is paused.
    pub fn resume_playback(&mut self) -> Result<bool> {
        match self.player.resume() {
            Ok(resumed) => Ok(resumed),
            Err(e) => {
                // The stream could not restart, the session is gone
                self.playing_id = None;
                self.position = 0.0;
                Err(e)
            }
        }
    }

    /// Stop playback and release the decoded buffer.
    pub fn stop_playback(&mut self) -> bool {
        self.playing_id = None;
        self.position = 0.0;
        self.player.stop()
    }

    /// Set the playback volume (clamped to 0.0..=1.0). Applies live.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { self.settings.volume } else { volume.clamp(0.0, 1.0) };
        self.settings.volume = volume;
        self.player.set_volume(volume);
        debug!("Volume set to {:.0}%", volume * 100.0);
    }

    /// Step the volume by `delta`, rounded to one decimal place.
    pub fn adjust_volume(&mut self, delta: f32) {
        let stepped = ((self.settings.volume + delta) * 10.0).round() / 10.0;
        self.set_volume(stepped);
    }

    // Timer

    /// Advance progress and detect end of playback. Call every `TICK_INTERVAL`.
    pub fn tick(&mut self) {
        if self.capturer.is_recording() {
            self.elapsed += TICK_INTERVAL;
            self.pulse = (self.pulse + 1) % PULSE_PERIOD;

            if let Some(message) = self.capturer.session().and_then(|session| session.take_write_error()) {
                self.notify(format!("Recording write error: {}", message));
            }
        }

        if self.player.state() == PlaybackState::Playing {
            if let Some(session) = self.player.session() {
                self.position = session.position_seconds();
            }

            // The audio callback never stops its own stream
            if self.player.reached_end() {
                info!("Playback finished");
                self.stop_playback();
            }
        }

        if let Some(notification) = self.notification.as_mut() {
            notification.age += TICK_INTERVAL;
            if notification.age >= NOTIFICATION_TTL {
                self.notification = None;
            }
        }
    }

    // Memo operations

    pub fn rename_memo(&mut self, id: &str, title: &str) -> Result<bool> {
        let result = self.store.rename(id, title);
        self.surface(result)
    }

    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let result = self.store.add_tag(id, tag);
        self.surface(result)
    }

    /// Delete a memo and its audio file, stopping its playback first.
    pub fn delete_memo(&mut self, id: &str) -> Result<MemoRecord> {
        if self.playing_id.as_deref() == Some(id) {
            self.stop_playback();
        }
        let result = self.store.delete(id);
        if let Ok(ref memo) = result {
            info!("🗑️  Deleted {}", memo.display_name);
        }
        self.surface(result)
    }

    /// Copy a memo to the export directory.
    pub fn export_memo(&mut self, id: &str) -> Result<PathBuf> {
        let result = self.store.export(id, &self.export_dir, memo::now_local());
        match result {
            Ok(path) => {
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                let message = format!("Exported to {}: {}", self.export_dir.display(), name);
                self.notify(message);
                Ok(path)
            }
            Err(e) => self.surface(Err(e)),
        }
    }

    /// Create the 440 Hz test tone if needed and put it at the top of the list.
    pub fn load_test_tone(&mut self) -> Result<()> {
        let result = self.try_load_test_tone();
        self.surface(result)
    }

    fn try_load_test_tone(&mut self) -> Result<()> {
        let path = self.store.dir().join(TEST_TONE_FILENAME);
        if !path.exists() {
            memo::write_test_tone(&path).map_err(|e| Error::PersistenceFailure(format!("{}: {}", path.display(), e)))?;
            debug!("Created test tone at {}", path.display());
        }

        let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        self.store.upsert_front(memo::test_tone_record(memo::now_local(), size))?;
        info!("Test tone loaded: {}", TEST_TONE_FILENAME);
        Ok(())
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.devices()
    }

    /// Finalize any open recording and stop playback.
    pub fn shutdown(&mut self) {
        if let Some(memo) = self.stop_capture() {
            info!("Recording finalized on shutdown: {}", memo.filename);
        }
        self.stop_playback();
    }

    // Accessors

    pub fn activity(&self) -> Activity {
        if self.capturer.is_recording() {
            return Activity::Recording;
        }
        match self.player.state() {
            PlaybackState::Playing => Activity::Playing,
            PlaybackState::Paused => Activity::Paused,
            PlaybackState::Idle => Activity::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.capturer.is_recording()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.player.state()
    }

    /// Elapsed recording time as counted by ticks.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn pulse(&self) -> u32 {
        self.pulse
    }

    /// Playback position in seconds as of the last tick.
    pub fn playback_position(&self) -> f64 {
        self.position
    }

    /// Length of the memo being played, in seconds.
    pub fn playback_duration(&self) -> Option<f64> {
        self.player.session().map(|session| session.duration_seconds())
    }

    pub fn playing_id(&self) -> Option<&str> {
        self.playing_id.as_deref()
    }

    /// Current capture levels; zero when not recording.
    pub fn levels(&self) -> Levels {
        self.capturer.session().map(|session| session.levels()).unwrap_or_default()
    }

    /// Bytes written by the open recording.
    pub fn bytes_recorded(&self) -> u64 {
        self.capturer.session().map(|session| session.bytes_written()).unwrap_or(0)
    }

    pub fn volume(&self) -> f32 {
        self.settings.volume
    }

    pub fn memos(&self) -> &[MemoRecord] {
        self.store.memos()
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    // Helpers

    fn device_for(&self, direction: Direction) -> Result<DeviceInfo> {
        let devices = self.backend.devices()?;
        let configured = match direction {
            Direction::Input => self.settings.input_device_id(),
            Direction::Output => self.settings.output_device_id(),
        };
        select_device(&devices, configured, direction)
    }

    fn notify(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("📣 {}", message);
        self.notification = Some(Notification { message, age: Duration::ZERO });
    }

    /// Log and raise a notification for a failed operation, passing the
    /// result through.
    fn surface<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            match e {
                Error::PersistenceFailure(_) => error!("{}", e),
                _ => warn!("{}", e),
            }
            self.notify(e.to_string());
        }
        result
    }
}
