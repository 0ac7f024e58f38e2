//! Speech collaborators
//!
//! Text-to-speech and speech capture live on the platform side. The core
//! only asks them to act; capture results come back as
//! [`TriggerEvent`](crate::events::TriggerEvent)s on the orchestrator channel.

/// Text-to-speech sink. Fire-and-forget.
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str);
}

/// Single-shot speech capture
pub trait SpeechCapture: Send + Sync {
    /// Begin capturing one utterance in `locale`. The transcript or error is
    /// delivered later as an event tagged with `cycle`.
    fn start(&self, cycle: u64, locale: &str) -> Result<(), CaptureError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no speech capture client connected")]
    Unavailable,
}
