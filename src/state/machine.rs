//! Core trigger state machine
//!
//! Handles transitions between Idle, Armed, Listening and Processing. The
//! machine is synchronous: it consumes one event at a time and returns the
//! effects the orchestrator must carry out. Only the orchestrator task owns
//! it, so the Idle→Armed check-and-set cannot race with a completing cycle.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dispatch::Vocabulary;
use crate::events::{StateEvent, TriggerEvent};
use crate::intent::Utterance;

use super::pipeline::PipelineReport;

/// The four states of a trigger cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Waiting for a shake
    #[default]
    Idle,
    /// Prompt spoken, waiting for the listen delay
    Armed,
    /// Speech capture running
    Listening,
    /// Resolve and dispatch running off the orchestrator
    Processing,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Armed => write!(f, "Armed"),
            State::Listening => write!(f, "Listening"),
            State::Processing => write!(f, "Processing"),
        }
    }
}

/// Work the orchestrator performs on behalf of the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Speak(String),
    /// Deliver `ListenWindowOpened { cycle }` after `after`
    OpenListenWindow { cycle: u64, after: Duration },
    StartCapture { cycle: u64, locale: &'static str },
    /// Deliver `ListenTimedOut { cycle }` after `after`
    ArmListenTimeout { cycle: u64, after: Duration },
    RunPipeline { cycle: u64, utterance: Utterance },
}

/// Timing rules for a trigger cycle
#[derive(Debug, Clone, Copy)]
pub struct TriggerTiming {
    /// Minimum gap between accepted shakes
    pub cooldown: Duration,
    /// Delay between the spoken prompt and the start of capture
    pub arm_delay: Duration,
    /// How long to wait for a transcript
    pub listen_timeout: Duration,
}

impl Default for TriggerTiming {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(1500),
            arm_delay: Duration::from_millis(1500),
            listen_timeout: Duration::from_secs(10),
        }
    }
}

/// The state machine that sequences shake, capture and processing
pub struct StateMachine {
    state: State,
    /// Number of the current (or last) cycle
    cycle: u64,
    /// Time of the last accepted shake
    last_trigger: Option<Instant>,
    timing: TriggerTiming,
    vocabulary: &'static Vocabulary,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateMachine {
    pub fn new(
        timing: TriggerTiming,
        vocabulary: &'static Vocabulary,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            state: State::Idle,
            cycle: 0,
            last_trigger: None,
            timing,
            vocabulary,
            event_tx,
        }
    }

    /// Get the current state
    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    #[cfg(test)]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn vocabulary(&self) -> &'static Vocabulary {
        self.vocabulary
    }

    /// Whether a capture cycle is in progress. Sensor input is ignored while
    /// this is true.
    pub fn is_capturing(&self) -> bool {
        self.state != State::Idle
    }

    /// Apply one event
    pub fn handle(&mut self, event: TriggerEvent, now: Instant) -> Vec<Effect> {
        match event {
            TriggerEvent::ShakeDetected { g_force } => self.on_shake(g_force, now),
            TriggerEvent::ListenWindowOpened { cycle } => self.on_listen_window(cycle),
            TriggerEvent::ListenTimedOut { cycle } => {
                if self.is_current(cycle, State::Listening) {
                    self.abort("listen timeout", now);
                }
                Vec::new()
            }
            TriggerEvent::TranscriptReady { cycle, text } => self.on_transcript(cycle, text, now),
            TriggerEvent::TranscriptFailed { cycle, reason } => {
                if self.is_current(cycle, State::Listening) {
                    self.abort(&reason, now);
                } else {
                    debug!(
                        cycle,
                        current = self.cycle,
                        state = %self.state,
                        %reason,
                        "stale capture error ignored"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Speech capture could not be started for `cycle`
    pub fn capture_failed(&mut self, cycle: u64, reason: &str, now: Instant) {
        if self.is_current(cycle, State::Listening) {
            self.abort(reason, now);
        }
    }

    /// The pipeline for `cycle` finished; speak its results and go idle
    pub fn pipeline_finished(
        &mut self,
        cycle: u64,
        report: PipelineReport,
        now: Instant,
    ) -> Vec<Effect> {
        if !self.is_current(cycle, State::Processing) {
            warn!(cycle, current = self.cycle, state = %self.state, "unexpected pipeline completion");
            return Vec::new();
        }

        let duration_ms = self.cycle_elapsed_ms(now);
        self.transition_to(State::Idle);
        self.emit(StateEvent::CycleComplete { cycle, duration_ms });

        report
            .spoken
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .map(Effect::Speak)
            .collect()
    }

    fn on_shake(&mut self, g_force: f32, now: Instant) -> Vec<Effect> {
        if self.is_capturing() {
            debug!(state = %self.state, "shake ignored, cycle in progress");
            return Vec::new();
        }

        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) <= self.timing.cooldown {
                debug!("shake ignored, cooling down");
                return Vec::new();
            }
        }

        self.last_trigger = Some(now);
        self.cycle += 1;
        info!(cycle = self.cycle, g_force, "shake accepted");
        self.transition_to(State::Armed);
        self.emit(StateEvent::Armed { cycle: self.cycle });

        vec![
            Effect::Speak(self.vocabulary.arm_prompt.to_string()),
            Effect::OpenListenWindow {
                cycle: self.cycle,
                after: self.timing.arm_delay,
            },
        ]
    }

    fn on_listen_window(&mut self, cycle: u64) -> Vec<Effect> {
        if !self.is_current(cycle, State::Armed) {
            debug!(cycle, "stale listen window ignored");
            return Vec::new();
        }

        self.transition_to(State::Listening);
        self.emit(StateEvent::ListeningStarted { cycle });

        vec![
            Effect::StartCapture {
                cycle,
                locale: self.vocabulary.speech_locale,
            },
            Effect::ArmListenTimeout {
                cycle,
                after: self.timing.listen_timeout,
            },
        ]
    }

    fn on_transcript(&mut self, cycle: u64, text: String, now: Instant) -> Vec<Effect> {
        if !self.is_current(cycle, State::Listening) {
            debug!(cycle, current = self.cycle, state = %self.state, "stale transcript ignored");
            return Vec::new();
        }

        let command = text.trim().to_lowercase();
        if command.is_empty() {
            self.abort("empty transcript", now);
            return Vec::new();
        }

        self.transition_to(State::Processing);
        self.emit(StateEvent::ProcessingStarted { cycle: self.cycle });

        vec![Effect::RunPipeline {
            cycle: self.cycle,
            utterance: Utterance {
                text: command,
                language_code: self.vocabulary.language_code.to_string(),
            },
        }]
    }

    /// End the current cycle without running the pipeline
    fn abort(&mut self, reason: &str, now: Instant) {
        warn!(
            cycle = self.cycle,
            elapsed_ms = self.cycle_elapsed_ms(now),
            %reason,
            "capture cycle aborted"
        );
        self.transition_to(State::Idle);
        self.emit(StateEvent::CycleAborted {
            cycle: self.cycle,
            reason: reason.to_string(),
        });
    }

    fn is_current(&self, cycle: u64, state: State) -> bool {
        self.cycle == cycle && self.state == state
    }

    fn cycle_elapsed_ms(&self, now: Instant) -> u64 {
        self.last_trigger
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0)
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: State) {
        info!(
            from = %self.state,
            to = %new_state,
            cycle = self.cycle,
            "state transition"
        );
        self.state = new_state;
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting state event");
        let _ = self.event_tx.send(event);
    }
}
