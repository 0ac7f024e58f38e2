//! voice-light-daemon: shake-to-talk control for a cloud smart light
//!
//! The daemon runs in the background and provides:
//! - Shake detection over accelerometer samples fed by the platform adapter
//! - An explicit trigger state machine (Idle, Armed, Listening, Processing)
//! - Intent resolution through a remote NLU agent
//! - Signed light commands against the device cloud
//! - IPC server for the speech, TTS and sensor adapters
//!
//! Out of scope:
//! - On-device speech recognition or synthesis (delegated over IPC)
//! - Device discovery, multi-device control, scenes

mod cloud;
mod config;
mod dispatch;
mod events;
mod intent;
mod ipc;
mod lifecycle;
mod sensor;
mod signing;
mod state;
mod voice;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cloud::CloudApiClient;
use crate::config::Config;
use crate::events::{StateEvent, TriggerEvent};
use crate::intent::{IntentResolver, KeyFileCredentials};
use crate::ipc::{IpcVoice, Notification, Server};
use crate::lifecycle::ShutdownSignal;
use crate::sensor::ShakeFilter;
use crate::state::{LightPipeline, Orchestrator, State, StateMachine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-light-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        region = %config.credentials.region,
        language = %config.language,
        "configuration loaded"
    );

    let vocabulary = config.language.vocabulary();

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // IPC server / timers -> orchestrator
    let (events_tx, events_rx) = mpsc::channel::<TriggerEvent>(32);
    // State machine -> IPC server (cycle events)
    let (state_tx, _) = broadcast::channel::<StateEvent>(64);
    // Daemon -> subscribed platform adapters
    let (notify_tx, _) = broadcast::channel::<Notification>(64);

    // Remote collaborators
    let client = CloudApiClient::new(config.credentials.clone(), config.http_timeout)
        .context("failed to build cloud HTTP client")?;
    let nlu_credentials = Arc::new(KeyFileCredentials::new(
        &config.nlu_key_file,
        config.nlu_token_command.clone(),
    ));
    let resolver = IntentResolver::new(nlu_credentials, vocabulary, config.http_timeout)
        .context("failed to build NLU HTTP client")?;
    let pipeline = LightPipeline::new(client, resolver, vocabulary);

    // Orchestrator drives the state machine and runs the pipeline
    let machine = StateMachine::new(config.timing, vocabulary, state_tx.clone());
    let voice = Arc::new(IpcVoice::new(notify_tx.clone()));
    let orchestrator = Orchestrator::new(machine, pipeline, voice.clone(), voice, &events_tx);

    // Create IPC server
    let server = Server::new(
        &config.socket_path,
        events_tx,
        notify_tx.clone(),
        ShakeFilter::new(config.shake_threshold_g),
    )?;

    // Subscribe to state events for IPC updates
    let mut ipc_event_rx = state_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the orchestrator (processes trigger events)
        _ = orchestrator.run(events_rx) => {
            info!("orchestrator exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Handle state events for IPC synchronization
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "state event");
                        let new_state = match &event {
                            StateEvent::Armed { .. } => State::Armed,
                            StateEvent::ListeningStarted { .. } => State::Listening,
                            StateEvent::ProcessingStarted { .. } => State::Processing,
                            StateEvent::CycleComplete { .. } | StateEvent::CycleAborted { .. } => {
                                State::Idle
                            }
                        };
                        server_for_events.set_state(new_state).await;
                        let _ = notify_tx.send(Notification::Cycle { event });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("voice-light-daemon stopped");

    Ok(())
}
