//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Responses and notifications share the connection; their `type` tags do not
//! overlap.

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::state::State;

/// Current trigger state as seen by platform clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    Armed,
    Listening,
    Processing,
}

/// Requests from the platform adapter to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to speech requests and state notifications
    Subscribe,

    /// Raw accelerometer sample in m/s²
    Motion { x: f32, y: f32, z: f32 },

    /// Best transcript for the `cycle` named in `start_listening`
    Transcript { cycle: u64, text: String },

    /// Speech recognizer reported an error for `cycle`
    TranscriptFailed { cycle: u64, reason: String },
}

/// Responses from daemon to the platform adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Input was taken (a motion sample may still be below threshold)
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Vocalize `text`
    Speak { text: String },

    /// Capture one utterance and reply with `transcript` or
    /// `transcript_failed`, echoing `cycle`
    StartListening { cycle: u64, locale: String },

    /// Trigger state has changed
    StateChanged { mode: Mode, previous: Mode },

    /// Cycle lifecycle event
    Cycle { event: StateEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current trigger state
    pub mode: Mode,

    /// Number of connected subscribers (speech and TTS adapters)
    pub subscribers: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: Mode::default(),
            subscribers: 0,
            uptime_secs: 0,
        }
    }
}

/// Convert internal State to IPC Mode
impl From<State> for Mode {
    fn from(state: State) -> Self {
        match state {
            State::Idle => Mode::Idle,
            State::Armed => Mode::Armed,
            State::Listening => Mode::Listening,
            State::Processing => Mode::Processing,
        }
    }
}
