//! Device command payloads for the dimmable colour light

use serde::{Deserialize, Serialize};

/// HSV colour as understood by `colour_data_v2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsv {
    /// Hue in degrees, `[0, 360)`
    pub h: u16,
    /// Saturation, `[0, 1000]`
    pub s: u16,
    /// Value, `[0, 1000]`
    pub v: u16,
}

impl Hsv {
    /// Colour channel fully off
    pub const OFF: Hsv = Hsv { h: 0, s: 0, v: 0 };
}

/// A single data-point write on the device.
///
/// Serializes as `{"code": "...", "value": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "value", rename_all = "snake_case")]
pub enum DeviceCommand {
    SwitchLed(bool),
    BrightValueV2(u16),
    ColourDataV2(Hsv),
}

/// Body of `POST /v1.0/devices/{id}/commands`
#[derive(Debug, Serialize)]
pub(crate) struct CommandBatch<'a> {
    pub commands: &'a [DeviceCommand],
}
