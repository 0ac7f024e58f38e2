//! Unix domain socket server for IPC
//!
//! Platform adapters connect here to feed accelerometer samples and
//! transcripts, and subscribe to speak/listen requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::TriggerEvent;
use crate::sensor::{AccelSample, ShakeFilter};
use crate::state::State;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted frame
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    ctx: ClientContext,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    /// Current trigger state (for mode tracking)
    current_state: State,
}

/// Everything a client handler needs
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    events_tx: mpsc::Sender<TriggerEvent>,
    notify_tx: broadcast::Sender<Notification>,
    shake_filter: ShakeFilter,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        events_tx: mpsc::Sender<TriggerEvent>,
        notify_tx: broadcast::Sender<Notification>,
        shake_filter: ShakeFilter,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
            current_state: State::Idle,
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            ctx: ClientContext {
                state,
                events_tx,
                notify_tx,
                shake_filter,
            },
            shutdown_tx,
        })
    }

    /// Update the current trigger state and tell subscribers
    pub async fn set_state(&self, state: State) {
        let mut server_state = self.ctx.state.write().await;
        let old_state = server_state.current_state;
        server_state.current_state = state;
        server_state.status.mode = state.into();

        if old_state != state {
            debug!(from = %old_state, to = %state, "IPC server: mode updated");
            let _ = self.ctx.notify_tx.send(Notification::StateChanged {
                mode: state.into(),
                previous: old_state.into(),
            });
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = self.ctx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = ctx.handle_client(stream) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

impl ClientContext {
    /// Handle a single client connection
    async fn handle_client(self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a half-read frame is never
        // lost to the select below
        let (req_tx, mut req_rx) = mpsc::channel(16);
        let reader_task = tokio::spawn(read_requests(reader, req_tx));

        let mut notifications: Option<broadcast::Receiver<Notification>> = None;

        let result = loop {
            tokio::select! {
                maybe_request = req_rx.recv() => {
                    let Some(request) = maybe_request else { break Ok(()) };
                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            self.process_request(request, &mut notifications).await
                        }
                        Err(message) => Response::Error {
                            code: "bad_request".to_string(),
                            message,
                        },
                    };
                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                note = recv_notification(&mut notifications) => match note {
                    Ok(note) => {
                        if let Err(e) = send_message(&mut writer, &note).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        notifications = None;
                    }
                },
            }
        };

        reader_task.abort();
        debug!("client disconnected");
        result
    }

    /// Process a request and return a response
    async fn process_request(
        &self,
        request: Request,
        notifications: &mut Option<broadcast::Receiver<Notification>>,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = self.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                state.status.subscribers = self.notify_tx.receiver_count();
                Response::Status(state.status.clone())
            }

            Request::Subscribe => {
                if notifications.is_none() {
                    *notifications = Some(self.notify_tx.subscribe());
                    debug!("client subscribed to notifications");
                }
                Response::Subscribed
            }

            Request::Motion { x, y, z } => {
                let Some(g_force) = self.shake_filter.check(&AccelSample { x, y, z }) else {
                    return Response::Accepted;
                };
                match self.events_tx.try_send(TriggerEvent::ShakeDetected { g_force }) {
                    Ok(()) => Response::Accepted,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("event queue full, shake dropped");
                        Response::Accepted
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => unavailable(),
                }
            }

            Request::Transcript { cycle, text } => {
                self.forward(TriggerEvent::TranscriptReady { cycle, text }).await
            }

            Request::TranscriptFailed { cycle, reason } => {
                self.forward(TriggerEvent::TranscriptFailed { cycle, reason }).await
            }
        }
    }

    async fn forward(&self, event: TriggerEvent) -> Response {
        match self.events_tx.send(event).await {
            Ok(()) => Response::Accepted,
            Err(_) => unavailable(),
        }
    }
}

fn unavailable() -> Response {
    Response::Error {
        code: "unavailable".to_string(),
        message: "orchestrator is not running".to_string(),
    }
}

/// Read length-prefixed requests until EOF. Malformed frames are reported as
/// `Err` so the handler can answer them.
async fn read_requests(mut reader: OwnedReadHalf, req_tx: mpsc::Sender<Result<Request, String>>) {
    let mut len_buf = [0u8; 4];

    loop {
        // Read message length (4-byte little-endian)
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!(?e, "read error");
            }
            return;
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "message too large, disconnecting");
            return;
        }

        // Read message body
        let mut msg_buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut msg_buf).await {
            warn!(?e, "truncated message");
            return;
        }

        let parsed = serde_json::from_slice::<Request>(&msg_buf).map_err(|e| e.to_string());
        if req_tx.send(parsed).await.is_err() {
            return;
        }
    }
}

/// Wait for the next notification, or forever when not subscribed
async fn recv_notification(
    notifications: &mut Option<broadcast::Receiver<Notification>>,
) -> Result<Notification, broadcast::error::RecvError> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Send a length-prefixed JSON message
async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
