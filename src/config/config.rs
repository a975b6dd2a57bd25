//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use super::settings::{FormatLabel, Settings};

/// Voice memo recorder configuration.
///
/// Every audio flag is optional: when absent, the value persisted in
/// `<home-dir>/config.json` is used.
#[derive(Parser, Debug, Clone)]
#[command(name = "voicelog")]
#[command(author, version, about = "A terminal voice memo recorder", long_about = None)]
pub struct AppConfig {
    /// List audio devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Application directory holding config.json and, by default, the memos
    #[arg(long, env = "VOICELOG_HOME", default_value_os_t = default_home_dir())]
    pub home_dir: PathBuf,

    /// Directory for memo audio files and metadata.json
    #[arg(long, short = 'd', env = "VOICELOG_MEMOS_DIR")]
    pub memos_dir: Option<PathBuf>,

    /// Directory exported memos are copied to
    #[arg(long, env = "VOICELOG_EXPORT_DIR", default_value_os_t = default_export_dir())]
    pub export_dir: PathBuf,

    /// Input device id (see --list-devices)
    #[arg(long, short = 'i')]
    pub input_device: Option<String>,

    /// Output device id (see --list-devices)
    #[arg(long, short = 'o')]
    pub output_device: Option<String>,

    /// Requested capture sample rate. The device's preferred rate wins when it reports one
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: Option<u32>,

    /// Requested capture channel count (1 or 2)
    #[arg(long, short = 'c', value_parser = clap::value_parser!(u16).range(1..=2))]
    pub channels: Option<u16>,

    /// Playback volume (0.0 - 1.0)
    #[arg(long, value_parser = parse_volume)]
    pub volume: Option<f32>,

    /// Format label stored with new memos. Audio is always written as WAV
    #[arg(long, short = 'f', value_enum)]
    pub format: Option<FormatLabel>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Path of the persisted settings file.
    pub fn config_path(&self) -> PathBuf {
        self.home_dir.join("config.json")
    }

    /// Overlay command line values on persisted settings.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(ref dir) = self.memos_dir {
            settings.memos_path = dir.clone();
        }
        if let Some(ref id) = self.input_device {
            settings.input_device = id.clone();
        }
        if let Some(ref id) = self.output_device {
            settings.output_device = id.clone();
        }
        if let Some(rate) = self.sample_rate {
            settings.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            settings.channel_count = channels;
        }
        if let Some(volume) = self.volume {
            settings.volume = volume;
        }
        if let Some(format) = self.format {
            settings.default_format = format;
        }
    }

    /// Log the effective configuration.
    pub fn log_config(&self, settings: &Settings) {
        info!("Configuration:");
        info!("  Home directory: {}", self.home_dir.display());
        info!("  Memos directory: {}", settings.memos_path.display());
        info!("  Export directory: {}", self.export_dir.display());
        info!("  Sample rate: {} Hz", settings.sample_rate);
        info!("  Channels: {}", settings.channel_count);
        info!("  Bit depth: {}", settings.bit_depth);
        info!("  Volume: {:.0}%", settings.volume * 100.0);
        info!("  Format label: {}", settings.default_format);
        if !settings.input_device.is_empty() {
            info!("  Input device: {}", settings.input_device);
        }
        if !settings.output_device.is_empty() {
            info!("  Output device: {}", settings.output_device);
        }
    }
}

/// Get the default application directory (~/.voicelog).
fn default_home_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".voicelog")
    } else {
        PathBuf::from(".voicelog")
    }
}

/// Get the default export directory (the user's downloads folder).
fn default_export_dir() -> PathBuf {
    dirs::download_dir().or_else(|| dirs::home_dir().map(|home| home.join("Downloads"))).unwrap_or_else(|| PathBuf::from("."))
}

/// Parse and validate a volume value (0.0-1.0).
pub fn parse_volume(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("'{}' is not a valid float", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("volume must be between 0.0 and 1.0, got {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("0.5"), Ok(0.5));
        assert_eq!(parse_volume("0"), Ok(0.0));
        assert!(parse_volume("1.5").is_err());
        assert!(parse_volume("loud").is_err());
    }

    #[test]
    fn test_flags_override_settings() {
        let config = AppConfig::try_parse_from(["voicelog", "--home-dir", "/tmp/vl", "--sample-rate", "48000", "-c", "1", "--volume", "0.4", "--format", "ogg", "-i", "3"]).unwrap();
        assert_eq!(config.config_path(), PathBuf::from("/tmp/vl/config.json"));

        let mut settings = Settings::with_home(&config.home_dir);
        config.apply_to(&mut settings);

        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.channel_count, 1);
        assert_eq!(settings.volume, 0.4);
        assert_eq!(settings.default_format, FormatLabel::Ogg);
        assert_eq!(settings.input_device, "3");
        assert_eq!(settings.output_device, "");
        assert_eq!(settings.memos_path, PathBuf::from("/tmp/vl/memos"));
    }

    #[test]
    fn test_zero_volume_survives_normalize() {
        let config = AppConfig::try_parse_from(["voicelog", "--home-dir", "/tmp/vl", "--volume", "0"]).unwrap();

        let mut settings = Settings::with_home(&config.home_dir);
        config.apply_to(&mut settings);
        settings.normalize(&config.home_dir);

        assert_eq!(settings.volume, 0.0);
    }

    #[test]
    fn test_rejects_out_of_range_flags() {
        assert!(AppConfig::try_parse_from(["voicelog", "--channels", "3"]).is_err());
        assert!(AppConfig::try_parse_from(["voicelog", "--sample-rate", "0"]).is_err());
        assert!(AppConfig::try_parse_from(["voicelog", "--volume", "2"]).is_err());
    }
}
