//! Shared audio utilities for capture and playback.

use std::sync::atomic::{AtomicU32, Ordering};

use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

use crate::error::{Error, Result};

/// Get a human-readable device name.
///
/// # Arguments
/// * `device` - The audio device
///
/// # Returns
/// Device name string, or "Unknown" if the name cannot be retrieved.
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Find a stream configuration with exactly the requested layout.
///
/// Searches for a configuration that:
/// 1. Has exactly `channels` channels
/// 2. Covers `sample_rate` (no resampling is ever applied)
/// 3. Uses I16 samples, or F32 when the device has no I16 mode
///
/// # Arguments
/// * `configs` - Iterator of supported stream configurations
/// * `sample_rate` - Required sample rate
/// * `channels` - Required channel count
///
/// # Returns
/// The matching `SupportedStreamConfig`, or a `StreamFailure` if the device cannot
/// run at that layout.
pub fn find_stream_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, sample_rate: u32, channels: u16) -> Result<SupportedStreamConfig> {
    let candidates: Vec<SupportedStreamConfigRange> = configs
        .filter(|config| config.channels() == channels)
        .filter(|config| sample_rate >= config.min_sample_rate() && sample_rate <= config.max_sample_rate())
        .filter(|config| matches!(config.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .collect();

    let best = candidates
        .iter()
        .find(|config| config.sample_format() == SampleFormat::I16)
        .or_else(|| candidates.first())
        .ok_or_else(|| Error::stream(format!("no I16/F32 configuration with {} channel(s) at {} Hz", channels, sample_rate)))?;

    Ok((*best).with_sample_rate(sample_rate))
}

/// Convert a float sample in -1.0..=1.0 to 16-bit PCM, clamping out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert a 16-bit PCM sample to a float in -1.0..1.0.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Normalised absolute level of a sample (0.0..=1.0).
pub fn level_of(sample: i16) -> f32 {
    (sample as i32).unsigned_abs() as f32 / 32768.0
}

/// An `f32` that can be shared with the audio thread without locking.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
