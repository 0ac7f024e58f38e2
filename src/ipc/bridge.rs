//! Speech collaborators backed by IPC subscribers

use tokio::sync::broadcast;
use tracing::debug;

use crate::voice::{CaptureError, Speaker, SpeechCapture};

use super::protocol::Notification;

/// Forwards speak and listen requests to every subscribed platform client
#[derive(Debug, Clone)]
pub struct IpcVoice {
    notify_tx: broadcast::Sender<Notification>,
}

impl IpcVoice {
    pub fn new(notify_tx: broadcast::Sender<Notification>) -> Self {
        Self { notify_tx }
    }
}

impl Speaker for IpcVoice {
    fn speak(&self, text: &str) {
        let note = Notification::Speak {
            text: text.to_string(),
        };
        if self.notify_tx.send(note).is_err() {
            debug!(%text, "no subscriber to speak");
        }
    }
}

impl SpeechCapture for IpcVoice {
    fn start(&self, cycle: u64, locale: &str) -> Result<(), CaptureError> {
        let note = Notification::StartListening {
            cycle,
            locale: locale.to_string(),
        };
        self.notify_tx
            .send(note)
            .map(|receivers| debug!(receivers, cycle, %locale, "listen request sent"))
            .map_err(|_| CaptureError::Unavailable)
    }
}
