//! Session coordination: the control-path side of recording and playback.

mod coordinator;

pub use coordinator::{Activity, Coordinator, TICK_INTERVAL};
