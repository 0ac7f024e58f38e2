//! IPC module for daemon-platform communication

mod bridge;
mod protocol;
mod server;

pub use bridge::IpcVoice;
pub use protocol::Notification;
pub use server::Server;
