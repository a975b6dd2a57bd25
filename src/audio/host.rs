//! `AudioBackend` implementation on top of cpal.
//!
//! Streams run at exactly the requested rate and channel count. Devices that
//! only expose F32 are bridged to the 16-bit sample callbacks in place.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, DeviceInfo, Direction, InputCallback, OutputCallback, StreamHandle, StreamParams};
use super::util::{f32_to_i16, find_stream_config, get_device_name, i16_to_f32};
use crate::error::{Error, Result};

/// Audio backend using the platform's default cpal host.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Resolve a `DeviceInfo` back to a live cpal device.
    ///
    /// Ids are enumeration indices; the name is checked so a re-ordered device
    /// list cannot silently pick the wrong device.
    fn find_device(&self, info: &DeviceInfo, direction: Direction) -> Result<Device> {
        let by_index = info
            .id
            .parse::<usize>()
            .ok()
            .and_then(|index| self.host.devices().ok()?.nth(index))
            .filter(|device| get_device_name(device) == info.name);

        if let Some(device) = by_index {
            return Ok(device);
        }

        let by_name = self.host.devices().map_err(Error::stream)?.find(|device| get_device_name(device) == info.name);
        if let Some(device) = by_name {
            return Ok(device);
        }

        warn!("Device '{}' not found, using system default {} device", info.name, direction);
        match direction {
            Direction::Input => self.host.default_input_device(),
            Direction::Output => self.host.default_output_device(),
        }
        .ok_or(Error::DeviceUnavailable(direction))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let default_input = self.host.default_input_device().map(|d| get_device_name(&d));
        let default_output = self.host.default_output_device().map(|d| get_device_name(&d));

        let mut devices = Vec::new();
        for (index, device) in self.host.devices().map_err(Error::stream)?.enumerate() {
            let name = get_device_name(&device);
            let max_input_channels = device.supported_input_configs().map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0)).unwrap_or(0);
            let max_output_channels = device.supported_output_configs().map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0)).unwrap_or(0);

            // Skip devices with no I/O channels
            if max_input_channels == 0 && max_output_channels == 0 {
                continue;
            }

            let preferred = if max_input_channels > 0 { device.default_input_config() } else { device.default_output_config() };
            let preferred_sample_rate = preferred.map(|config| config.sample_rate()).unwrap_or(0);

            let info = DeviceInfo {
                id: index.to_string(),
                is_default: default_input.as_deref() == Some(name.as_str()) || default_output.as_deref() == Some(name.as_str()),
                name,
                is_input: max_input_channels > 0,
                is_output: max_output_channels > 0,
                preferred_sample_rate,
                max_input_channels,
                max_output_channels,
            };
            debug!(
                "Found device: id={}, name={}, input={}, output={}, channels={}/{}, rate={} Hz",
                info.id, info.name, info.is_input, info.is_output, info.max_input_channels, info.max_output_channels, info.preferred_sample_rate
            );
            devices.push(info);
        }

        Ok(devices)
    }

    fn open_input_stream(&self, device: &DeviceInfo, params: StreamParams, mut on_block: InputCallback) -> Result<Box<dyn StreamHandle>> {
        let device = self.find_device(device, Direction::Input)?;
        info!("Using input device: {}", get_device_name(&device));

        let supported = device.supported_input_configs().map_err(Error::stream)?;
        let config = find_stream_config(supported, params.sample_rate, params.channels)?;
        let stream_config = stream_config_for(&config, params);

        debug!("Audio capture config: {} Hz, {} channels, {:?}, {:?}", stream_config.sample_rate, stream_config.channels, config.sample_format(), stream_config.buffer_size);

        let err_fn = |err| {
            tracing::error!("Audio capture error: {}", err);
        };

        let stream = match config.sample_format() {
            SampleFormat::I16 => device.build_input_stream(&stream_config, move |data: &[i16], _: &cpal::InputCallbackInfo| on_block(data), err_fn, None),
            _ => {
                let mut scratch: Vec<i16> = Vec::with_capacity(block_len(params));
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| f32_to_i16(s)));
                        on_block(&scratch);
                    },
                    err_fn,
                    None,
                )
            }
        }
        .map_err(Error::stream)?;

        Ok(Box::new(stream))
    }

    fn open_output_stream(&self, device: &DeviceInfo, params: StreamParams, mut on_request: OutputCallback) -> Result<Box<dyn StreamHandle>> {
        let device = self.find_device(device, Direction::Output)?;
        info!("Using output device: {}", get_device_name(&device));

        let supported = device.supported_output_configs().map_err(Error::stream)?;
        let config = find_stream_config(supported, params.sample_rate, params.channels)?;
        let stream_config = stream_config_for(&config, params);

        debug!("Audio playback config: {} Hz, {} channels, {:?}, {:?}", stream_config.sample_rate, stream_config.channels, config.sample_format(), stream_config.buffer_size);

        let err_fn = |err| {
            tracing::error!("Audio playback error: {}", err);
        };

        let stream = match config.sample_format() {
            SampleFormat::I16 => {
                device.build_output_stream(&stream_config, move |data: &mut [i16], _: &cpal::OutputCallbackInfo| on_request(data), err_fn, None)
            }
            _ => {
                let mut scratch: Vec<i16> = Vec::with_capacity(block_len(params));
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        on_request(&mut scratch);
                        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = i16_to_f32(sample);
                        }
                    },
                    err_fn,
                    None,
                )
            }
        }
        .map_err(Error::stream)?;

        Ok(Box::new(stream))
    }
}

impl StreamHandle for Stream {
    fn play(&self) -> Result<()> {
        StreamTrait::play(self).map_err(Error::stream)
    }

    fn pause(&self) -> Result<()> {
        StreamTrait::pause(self).map_err(Error::stream)
    }
}

/// Build the concrete stream config, requesting a fixed block size when the
/// device advertises it as supported.
fn stream_config_for(config: &SupportedStreamConfig, params: StreamParams) -> StreamConfig {
    let mut stream_config: StreamConfig = config.config();
    stream_config.buffer_size = match config.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&params.block_frames) => BufferSize::Fixed(params.block_frames),
        _ => {
            debug!("Fixed block of {} frames not supported, using device default", params.block_frames);
            BufferSize::Default
        }
    };
    stream_config
}

fn block_len(params: StreamParams) -> usize {
    params.block_frames as usize * params.channels as usize
}
