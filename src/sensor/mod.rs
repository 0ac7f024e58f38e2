//! Motion sensor input
//!
//! Converts raw accelerometer samples from the platform into shake events
//! before they reach the trigger state machine.

mod shake;

pub use shake::{AccelSample, ShakeFilter, DEFAULT_THRESHOLD_G};
