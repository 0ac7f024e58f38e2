//! Accelerometer samples and shake detection
//!
//! Samples arrive as raw m/s² per axis. A sample counts as a shake when its
//! magnitude, in multiples of standard gravity, exceeds the threshold.

use serde::{Deserialize, Serialize};

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Default shake threshold in g
pub const DEFAULT_THRESHOLD_G: f32 = 3.5;

/// One 3-axis accelerometer reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    /// Magnitude of the acceleration vector in g
    pub fn g_force(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt() / STANDARD_GRAVITY
    }
}

/// Stateless threshold check applied at the sensor edge
#[derive(Debug, Clone, Copy)]
pub struct ShakeFilter {
    threshold_g: f32,
}

impl ShakeFilter {
    pub fn new(threshold_g: f32) -> Self {
        Self { threshold_g }
    }

    /// Returns the g-force of `sample` if it is a shake
    pub fn check(&self, sample: &AccelSample) -> Option<f32> {
        let g = sample.g_force();
        (g > self.threshold_g).then_some(g)
    }
}

impl Default for ShakeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_G)
    }
}
