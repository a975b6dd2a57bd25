//! Audio I/O: device abstraction, 16-bit PCM WAV codec, capture and playback.
//!
//! Capture and playback sessions talk to an `AudioBackend`. The production
//! backend wraps cpal; tests drive an in-memory fake synchronously.

pub mod backend;
pub mod capture;
pub mod host;
pub mod playback;
pub mod util;
pub mod wav;

pub use backend::{AudioBackend, DeviceInfo, Direction, select_device};
pub use capture::{Capturer, Levels};
pub use host::CpalBackend;
pub use playback::{PlaybackState, Player};
pub use wav::AudioFormat;
