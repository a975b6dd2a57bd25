//! Settings persisted between runs as `config.json`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::AudioFormat;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_BIT_DEPTH: u16 = 16;

/// Format label recorded with each memo. Only WAV is ever encoded; the other
/// labels are kept for compatibility with existing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatLabel {
    #[default]
    Wav,
    Mp3,
    Ogg,
}

impl fmt::Display for FormatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatLabel::Wav => write!(f, "WAV"),
            FormatLabel::Mp3 => write!(f, "MP3"),
            FormatLabel::Ogg => write!(f, "OGG"),
        }
    }
}

/// Persisted user settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_format: FormatLabel,
    pub memos_path: PathBuf,
    pub input_device: String,  // empty = system default
    pub output_device: String, // empty = system default
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channel_count: u16,
    pub volume: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: FormatLabel::Wav,
            memos_path: PathBuf::new(),
            input_device: String::new(),
            output_device: String::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_depth: DEFAULT_BIT_DEPTH,
            channel_count: DEFAULT_CHANNELS,
            volume: 1.0,
        }
    }
}

impl Settings {
    /// Defaults with the memo directory under `home`.
    pub fn with_home(home: &Path) -> Self {
        Self { memos_path: home.join("memos"), ..Self::default() }
    }

    /// Load settings from `path`.
    ///
    /// A missing file yields defaults, which are written back so the user has
    /// a file to edit. An unreadable or malformed file also yields defaults.
    /// The result is always normalised.
    pub fn load(path: &Path, home: &Path) -> Self {
        let mut settings = match fs::read(path) {
            Ok(data) => match serde_json::from_slice::<Settings>(&data) {
                Ok(settings) => {
                    debug!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Error parsing {}: {}, using defaults", path.display(), e);
                    Self::with_home(home)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let settings = Self::with_home(home);
                match settings.save(path) {
                    Ok(()) => info!("Created default settings at {}", path.display()),
                    Err(e) => warn!("Could not write default settings: {:#}", e),
                }
                settings
            }
            Err(e) => {
                warn!("Error reading {}: {}, using defaults", path.display(), e);
                Self::with_home(home)
            }
        };

        settings.normalize(home);
        settings
    }

    /// Write settings as pretty JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Replace out-of-range values with defaults.
    pub fn normalize(&mut self, home: &Path) {
        if self.memos_path.as_os_str().is_empty() {
            self.memos_path = home.join("memos");
        }
        if self.sample_rate == 0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if !(1..=2).contains(&self.channel_count) {
            self.channel_count = DEFAULT_CHANNELS;
        }
        if self.bit_depth != DEFAULT_BIT_DEPTH {
            warn!("Only 16-bit capture is supported, ignoring bit depth {}", self.bit_depth);
            self.bit_depth = DEFAULT_BIT_DEPTH;
        }
        if !(0.0..=1.0).contains(&self.volume) {
            self.volume = 1.0;
        }
    }

    /// Requested capture format.
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::pcm16(self.sample_rate, self.channel_count)
    }

    /// Configured device id, `None` when the system default should be used.
    pub fn input_device_id(&self) -> Option<&str> {
        Some(self.input_device.as_str()).filter(|id| !id.is_empty())
    }

    pub fn output_device_id(&self) -> Option<&str> {
        Some(self.output_device.as_str()).filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let settings = Settings::load(&path, dir.path());
        assert_eq!(settings, Settings::with_home(dir.path()));
        assert!(path.exists());
        assert_eq!(Settings::load(&path, dir.path()), settings);
    }

    #[test]
    fn test_normalizes_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"sample_rate": 0, "channel_count": 6, "bit_depth": 24, "volume": 3.5, "default_format": "mp3"}"#).unwrap();

        let settings = Settings::load(&path, dir.path());
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.channel_count, 2);
        assert_eq!(settings.bit_depth, 16);
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.default_format, FormatLabel::Mp3);
        assert_eq!(settings.memos_path, dir.path().join("memos"));
    }

    #[test]
    fn test_volume_range() {
        let mut settings = Settings { volume: 0.0, ..Settings::default() };
        settings.normalize(Path::new("/home"));
        assert_eq!(settings.volume, 0.0);

        for volume in [-0.1, 1.01, f32::NAN] {
            let mut settings = Settings { volume, ..Settings::default() };
            settings.normalize(Path::new("/home"));
            assert_eq!(settings.volume, 1.0);
        }

        let mut settings = Settings { volume: 0.3, ..Settings::default() };
        settings.normalize(Path::new("/home"));
        assert_eq!(settings.volume, 0.3);
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"sample_rate = 48000").unwrap();

        assert_eq!(Settings::load(&path, dir.path()), Settings::with_home(dir.path()));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let settings = Settings { input_device: "2".to_string(), sample_rate: 48000, channel_count: 1, volume: 0.7, ..Settings::with_home(dir.path()) };

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path, dir.path()), settings);
        assert_eq!(settings.input_device_id(), Some("2"));
        assert_eq!(settings.output_device_id(), None);
        assert_eq!(settings.audio_format(), AudioFormat::pcm16(48000, 1));
    }

    #[test]
    fn test_format_label_display() {
        assert_eq!(FormatLabel::Wav.to_string(), "WAV");
        assert_eq!(FormatLabel::Ogg.to_string(), "OGG");
    }
}
