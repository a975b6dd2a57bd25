//! Audio backend contract consumed by capture and playback sessions.
//!
//! The backend owns device enumeration and stream lifetime. Sessions only see
//! `DeviceInfo` records and boxed `StreamHandle`s, which keeps them testable
//! without audio hardware.

use std::fmt;

use crate::error::{Error, Result};

/// Frames per block requested from the backend.
pub const BLOCK_FRAMES: u32 = 1024;

/// Called on the audio thread with each captured block of interleaved samples.
pub type InputCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Called on the audio thread to fill each output block of interleaved samples.
pub type OutputCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A device as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub preferred_sample_rate: u32,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceInfo {
    pub fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.is_input,
            Direction::Output => self.is_output,
        }
    }

    pub fn max_channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.max_input_channels,
            Direction::Output => self.max_output_channels,
        }
    }
}

/// Parameters for opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_frames: u32,
}

/// An open stream. Dropping the handle closes it.
pub trait StreamHandle {
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
}

/// Device enumeration and stream construction.
pub trait AudioBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open_input_stream(&self, device: &DeviceInfo, params: StreamParams, on_block: InputCallback) -> Result<Box<dyn StreamHandle>>;

    fn open_output_stream(&self, device: &DeviceInfo, params: StreamParams, on_request: OutputCallback) -> Result<Box<dyn StreamHandle>>;
}

/// Pick the device to use for a direction.
///
/// Preference order: the configured id (if it supports the direction), the
/// default device, then the first capable device.
pub fn select_device(devices: &[DeviceInfo], configured_id: Option<&str>, direction: Direction) -> Result<DeviceInfo> {
    let capable = || devices.iter().filter(|d| d.supports(direction));

    if let Some(id) = configured_id.filter(|id| !id.is_empty()) {
        match capable().find(|d| d.id == id) {
            Some(device) => return Ok(device.clone()),
            None => tracing::warn!("Configured {} device '{}' not available, falling back to default", direction, id),
        }
    }

    capable()
        .find(|d| d.is_default)
        .or_else(|| capable().next())
        .cloned()
        .ok_or(Error::DeviceUnavailable(direction))
}

#[cfg(test)]
pub mod testing {
    //! In-memory backend driven synchronously by tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Call counters shared between a fake backend and its stream handles.
    #[derive(Debug, Default)]
    pub struct StreamCounters {
        pub plays: AtomicUsize,
        pub pauses: AtomicUsize,
        pub closes: AtomicUsize,
    }

    struct FakeStream {
        counters: Arc<StreamCounters>,
    }

    impl StreamHandle for FakeStream {
        fn play(&self) -> Result<()> {
            self.counters.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            self.counters.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeBackend {
        pub devices: Vec<DeviceInfo>,
        pub fail_open: AtomicBool,
        pub input: Mutex<Option<InputCallback>>,
        pub output: Mutex<Option<OutputCallback>>,
        pub last_params: Mutex<Option<StreamParams>>,
        pub counters: Arc<StreamCounters>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self { devices: vec![device("0", "Fake Duplex", true, true, 44100, 2)], ..Default::default() }
        }

        /// Deliver one captured block as the audio thread would.
        pub fn deliver_input(&self, block: &[i16]) {
            if let Some(callback) = self.input.lock().as_mut() {
                callback(block);
            }
        }

        /// Request one output block as the audio thread would.
        pub fn request_output(&self, slots: usize) -> Vec<i16> {
            let mut buffer = vec![i16::MIN; slots];
            if let Some(callback) = self.output.lock().as_mut() {
                callback(&mut buffer);
            }
            buffer
        }

        pub fn closes(&self) -> usize {
            self.counters.closes.load(Ordering::SeqCst)
        }

        pub fn pauses(&self) -> usize {
            self.counters.pauses.load(Ordering::SeqCst)
        }

        pub fn plays(&self) -> usize {
            self.counters.plays.load(Ordering::SeqCst)
        }
    }

    impl AudioBackend for FakeBackend {
        fn devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.clone())
        }

        fn open_input_stream(&self, _device: &DeviceInfo, params: StreamParams, on_block: InputCallback) -> Result<Box<dyn StreamHandle>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(Error::stream("fake input stream refused"));
            }
            *self.last_params.lock() = Some(params);
            *self.input.lock() = Some(on_block);
            Ok(Box::new(FakeStream { counters: self.counters.clone() }))
        }

        fn open_output_stream(&self, _device: &DeviceInfo, params: StreamParams, on_request: OutputCallback) -> Result<Box<dyn StreamHandle>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(Error::stream("fake output stream refused"));
            }
            *self.last_params.lock() = Some(params);
            *self.output.lock() = Some(on_request);
            Ok(Box::new(FakeStream { counters: self.counters.clone() }))
        }
    }

    pub fn device(id: &str, name: &str, is_input: bool, is_output: bool, rate: u32, channels: u16) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
            is_input,
            is_output,
            is_default: false,
            preferred_sample_rate: rate,
            max_input_channels: if is_input { channels } else { 0 },
            max_output_channels: if is_output { channels } else { 0 },
        }
    }
}
