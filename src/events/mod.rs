//! Events flowing into and out of the trigger state machine
//!
//! [`TriggerEvent`]s are consumed by the orchestrator task in arrival order.
//! [`StateEvent`]s are broadcast on every transition for IPC subscribers.

use serde::{Deserialize, Serialize};

/// Inputs to the trigger state machine.
///
/// Timer and capture events carry the cycle number they belong to and are
/// ignored once that cycle is over.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    /// A sensor sample crossed the shake threshold
    ShakeDetected { g_force: f32 },

    /// The post-prompt delay elapsed
    ListenWindowOpened { cycle: u64 },

    /// No transcript arrived in time
    ListenTimedOut { cycle: u64 },

    /// Speech capture for `cycle` produced its best transcript
    TranscriptReady { cycle: u64, text: String },

    /// Speech capture reported an error
    TranscriptFailed { cycle: u64, reason: String },
}

/// Events emitted by the state machine during transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Shake accepted, prompt spoken, waiting for the listen window
    Armed { cycle: u64 },

    /// Speech capture started
    ListeningStarted { cycle: u64 },

    /// Transcript received, pipeline running
    ProcessingStarted { cycle: u64 },

    /// Pipeline finished and the machine is idle again
    CycleComplete {
        cycle: u64,
        /// Time from the accepted shake to completion
        duration_ms: u64,
    },

    /// Capture failed or timed out; back to idle without running the pipeline
    CycleAborted { cycle: u64, reason: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::Armed { cycle } => write!(f, "ARMED #{}", cycle),
            StateEvent::ListeningStarted { cycle } => write!(f, "LISTENING_STARTED #{}", cycle),
            StateEvent::ProcessingStarted { cycle } => {
                write!(f, "PROCESSING_STARTED #{}", cycle)
            }
            StateEvent::CycleComplete { cycle, duration_ms } => {
                write!(f, "CYCLE_COMPLETE #{} ({}ms)", cycle, duration_ms)
            }
            StateEvent::CycleAborted { cycle, reason } => {
                write!(f, "CYCLE_ABORTED #{} ({})", cycle, reason)
            }
        }
    }
}
