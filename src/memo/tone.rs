//! Built-in 440 Hz test tone, handy for checking the output device.

use std::f64::consts::PI;
use std::path::Path;

use time::OffsetDateTime;

use super::MemoRecord;
use crate::audio::wav::{self, AudioFormat};

pub const TEST_TONE_ID: &str = "test_file";
pub const TEST_TONE_FILENAME: &str = "test_tone.wav";

const TONE_FORMAT: AudioFormat = AudioFormat::pcm16(44100, 1);
const TONE_FREQUENCY: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.3;
const TONE_SECONDS: f64 = 5.0;

fn tone_samples() -> Vec<i16> {
    let rate = TONE_FORMAT.sample_rate as f64;
    let count = (rate * TONE_SECONDS) as usize;
    (0..count)
        .map(|i| {
            let t = i as f64 / rate;
            (TONE_AMPLITUDE * i16::MAX as f64 * (2.0 * PI * TONE_FREQUENCY * t).sin()) as i16
        })
        .collect()
}

/// Write the test tone to `path`.
pub fn write_test_tone(path: &Path) -> std::io::Result<()> {
    wav::write_file(path, &TONE_FORMAT, &tone_samples())
}

/// Memo record describing the test tone file.
pub fn test_tone_record(created_at: OffsetDateTime, size_bytes: u64) -> MemoRecord {
    MemoRecord {
        id: TEST_TONE_ID.to_string(),
        filename: TEST_TONE_FILENAME.to_string(),
        display_name: "Test Tone (440Hz)".to_string(),
        duration_seconds: TONE_SECONDS,
        created_at,
        size_bytes,
        tags: vec!["test".to_string()],
        format_label: "WAV".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_file_is_five_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TEST_TONE_FILENAME);
        write_test_tone(&path).unwrap();

        let (format, samples) = wav::read_file(&path).unwrap();
        assert_eq!(format, TONE_FORMAT);
        assert_eq!(samples.len(), 220500);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 441000);
        assert_eq!(format.duration_for(441000), Some(5.0));

        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= (0.3 * 32767.0) as u16 + 1);
        assert!(peak > 9000);
    }
}
