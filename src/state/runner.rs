//! Orchestrator task
//!
//! Owns the state machine and executes its effects. Timers and the pipeline
//! run on other tasks; their results come back through the event channel or
//! the in-flight join handle and are applied here, one at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::events::TriggerEvent;
use crate::voice::{Speaker, SpeechCapture};

use super::machine::{Effect, StateMachine};
use super::pipeline::{Pipeline, PipelineReport};

/// A pipeline task together with the cycle it belongs to
struct InFlight<P> {
    cycle: u64,
    handle: JoinHandle<(P, PipelineReport)>,
}

/// Drives the state machine from the event channel
pub struct Orchestrator<P: Pipeline> {
    machine: StateMachine,
    /// `None` while the pipeline is lent out to a running cycle
    pipeline: Option<P>,
    speaker: Arc<dyn Speaker>,
    capture: Arc<dyn SpeechCapture>,
    /// Weak handle to our own channel, used by timers. Weak so the channel
    /// still closes once every producer is gone.
    timer_tx: mpsc::WeakSender<TriggerEvent>,
}

impl<P: Pipeline> Orchestrator<P> {
    pub fn new(
        machine: StateMachine,
        pipeline: P,
        speaker: Arc<dyn Speaker>,
        capture: Arc<dyn SpeechCapture>,
        events_tx: &mpsc::Sender<TriggerEvent>,
    ) -> Self {
        Self {
            machine,
            pipeline: Some(pipeline),
            speaker,
            capture,
            timer_tx: events_tx.downgrade(),
        }
    }

    /// Run until the event channel closes
    pub async fn run(mut self, mut events: mpsc::Receiver<TriggerEvent>) {
        info!("orchestrator started in Idle state");
        let mut in_flight: Option<InFlight<P>> = None;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else { break };
                    debug!(?event, "trigger event");
                    let effects = self.machine.handle(event, Instant::now());
                    self.apply(effects, &mut in_flight);
                }
                joined = join_in_flight(&mut in_flight) => {
                    let cycle = in_flight.take().map(|f| f.cycle).unwrap_or_default();
                    let report = self.reclaim(joined);
                    let effects = self.machine.pipeline_finished(cycle, report, Instant::now());
                    self.apply(effects, &mut in_flight);
                }
            }
        }

        if let Some(flight) = in_flight {
            flight.handle.abort();
        }
        info!("orchestrator stopped");
    }

    /// Take the pipeline back from a finished task
    fn reclaim(&mut self, joined: Result<(P, PipelineReport), JoinError>) -> PipelineReport {
        match joined {
            Ok((pipeline, report)) => {
                self.pipeline = Some(pipeline);
                report
            }
            Err(err) => {
                error!(?err, "pipeline task failed; light control unavailable");
                self.failure_report()
            }
        }
    }

    /// Report for a cycle that had no pipeline to run
    fn failure_report(&self) -> PipelineReport {
        PipelineReport {
            spoken: vec![self.machine.vocabulary().actuation_failed.to_string()],
        }
    }

    fn apply(&mut self, effects: Vec<Effect>, in_flight: &mut Option<InFlight<P>>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Speak(text) => self.speaker.speak(&text),
                Effect::OpenListenWindow { cycle, after } => {
                    self.schedule(after, TriggerEvent::ListenWindowOpened { cycle });
                }
                Effect::ArmListenTimeout { cycle, after } => {
                    self.schedule(after, TriggerEvent::ListenTimedOut { cycle });
                }
                Effect::StartCapture { cycle, locale } => {
                    if let Err(err) = self.capture.start(cycle, locale) {
                        warn!(?err, cycle, "speech capture could not start");
                        self.machine
                            .capture_failed(cycle, &err.to_string(), Instant::now());
                    }
                }
                Effect::RunPipeline { cycle, utterance } => match self.pipeline.take() {
                    Some(mut pipeline) => {
                        debug!(cycle, "pipeline dispatched");
                        let handle = tokio::spawn(async move {
                            let report = pipeline.run(utterance).await;
                            (pipeline, report)
                        });
                        *in_flight = Some(InFlight { cycle, handle });
                    }
                    None => {
                        error!(cycle, "no pipeline available");
                        let report = self.failure_report();
                        queue.extend(self.machine.pipeline_finished(cycle, report, Instant::now()));
                    }
                },
            }
        }
    }

    fn schedule(&self, after: Duration, event: TriggerEvent) {
        let weak_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(tx) = weak_tx.upgrade() else {
                debug!("event channel closed, timer dropped");
                return;
            };
            if tx.send(event).await.is_err() {
                debug!("orchestrator gone, timer dropped");
            }
        });
    }
}

/// Wait for the in-flight pipeline, or forever if there is none
async fn join_in_flight<P>(
    in_flight: &mut Option<InFlight<P>>,
) -> Result<(P, PipelineReport), JoinError> {
    match in_flight {
        Some(flight) => (&mut flight.handle).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    use super::*;
    use crate::dispatch::ENGLISH;
    use crate::events::StateEvent;
    use crate::intent::Utterance;
    use crate::state::machine::TriggerTiming;
    use crate::voice::CaptureError;

    #[derive(Default)]
    struct RecordingVoice {
        spoken: Mutex<Vec<String>>,
        starts: Mutex<Vec<String>>,
        unavailable: bool,
    }

    impl Speaker for RecordingVoice {
        fn speak(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
    }

    impl SpeechCapture for RecordingVoice {
        fn start(&self, cycle: u64, locale: &str) -> Result<(), CaptureError> {
            if self.unavailable {
                return Err(CaptureError::Unavailable);
            }
            self.starts.lock().unwrap().push(format!("{cycle}:{locale}"));
            Ok(())
        }
    }

    struct EchoPipeline {
        seen: Arc<Mutex<Vec<Utterance>>>,
    }

    #[async_trait]
    impl Pipeline for EchoPipeline {
        async fn run(&mut self, utterance: Utterance) -> PipelineReport {
            self.seen.lock().unwrap().push(utterance.clone());
            PipelineReport {
                spoken: vec![format!("heard {}", utterance.text)],
            }
        }
    }

    struct CrashingPipeline;

    #[async_trait]
    impl Pipeline for CrashingPipeline {
        async fn run(&mut self, utterance: Utterance) -> PipelineReport {
            panic!("light backend crashed on {:?}", utterance.text);
        }
    }

    struct Harness {
        tx: mpsc::Sender<TriggerEvent>,
        state_rx: broadcast::Receiver<StateEvent>,
        voice: Arc<RecordingVoice>,
        seen: Arc<Mutex<Vec<Utterance>>>,
        task: JoinHandle<()>,
    }

    fn start(voice: RecordingVoice, timing: TriggerTiming) -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = EchoPipeline { seen: seen.clone() };
        start_with(voice, timing, pipeline, seen)
    }

    fn start_with<P: Pipeline>(
        voice: RecordingVoice,
        timing: TriggerTiming,
        pipeline: P,
        seen: Arc<Mutex<Vec<Utterance>>>,
    ) -> Harness {
        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = broadcast::channel(32);
        let voice = Arc::new(voice);

        let machine = StateMachine::new(timing, &ENGLISH, state_tx);
        let orchestrator = Orchestrator::new(machine, pipeline, voice.clone(), voice.clone(), &tx);
        let task = tokio::spawn(orchestrator.run(rx));

        Harness {
            tx,
            state_rx,
            voice,
            seen,
            task,
        }
    }

    fn fast_timing() -> TriggerTiming {
        TriggerTiming {
            cooldown: Duration::from_millis(50),
            arm_delay: Duration::from_millis(20),
            listen_timeout: Duration::from_millis(200),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    async fn next_event(rx: &mut broadcast::Receiver<StateEvent>) -> StateEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("state event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let mut h = start(RecordingVoice::default(), fast_timing());

        h.tx.send(TriggerEvent::ShakeDetected { g_force: 4.2 })
            .await
            .unwrap();
        assert!(matches!(next_event(&mut h.state_rx).await, StateEvent::Armed { cycle: 1 }));
        assert!(matches!(
            next_event(&mut h.state_rx).await,
            StateEvent::ListeningStarted { cycle: 1 }
        ));
        wait_until(|| !h.voice.starts.lock().unwrap().is_empty()).await;
        assert_eq!(*h.voice.starts.lock().unwrap(), vec!["1:en-US".to_string()]);

        h.tx.send(TriggerEvent::TranscriptReady {
            cycle: 1,
            text: "Light On".into(),
        })
        .await
        .unwrap();
        assert!(matches!(
            next_event(&mut h.state_rx).await,
            StateEvent::ProcessingStarted { cycle: 1 }
        ));
        assert!(matches!(
            next_event(&mut h.state_rx).await,
            StateEvent::CycleComplete { cycle: 1, .. }
        ));

        assert_eq!(h.seen.lock().unwrap()[0].text, "light on");
        wait_until(|| h.voice.spoken.lock().unwrap().len() == 2).await;
        assert_eq!(
            *h.voice.spoken.lock().unwrap(),
            vec![ENGLISH.arm_prompt.to_string(), "heard light on".to_string()]
        );

        h.task.abort();
    }

    #[tokio::test]
    async fn test_listen_timeout_aborts_cycle() {
        let mut h = start(RecordingVoice::default(), fast_timing());

        h.tx.send(TriggerEvent::ShakeDetected { g_force: 4.2 })
            .await
            .unwrap();
        next_event(&mut h.state_rx).await;
        next_event(&mut h.state_rx).await;

        match next_event(&mut h.state_rx).await {
            StateEvent::CycleAborted { cycle, reason } => {
                assert_eq!(cycle, 1);
                assert_eq!(reason, "listen timeout");
            }
            other => panic!("unexpected event {other}"),
        }
        assert!(h.seen.lock().unwrap().is_empty());

        h.task.abort();
    }

    #[tokio::test]
    async fn test_unavailable_capture_returns_to_idle() {
        let voice = RecordingVoice {
            unavailable: true,
            ..Default::default()
        };
        let mut h = start(voice, fast_timing());

        h.tx.send(TriggerEvent::ShakeDetected { g_force: 4.2 })
            .await
            .unwrap();
        next_event(&mut h.state_rx).await;
        next_event(&mut h.state_rx).await;
        assert!(matches!(
            next_event(&mut h.state_rx).await,
            StateEvent::CycleAborted { cycle: 1, .. }
        ));

        // A later shake starts a fresh cycle
        tokio::time::sleep(Duration::from_millis(80)).await;
        h.tx.send(TriggerEvent::ShakeDetected { g_force: 4.2 })
            .await
            .unwrap();
        assert!(matches!(next_event(&mut h.state_rx).await, StateEvent::Armed { cycle: 2 }));

        h.task.abort();
    }

    #[tokio::test]
    async fn test_orchestrator_stops_when_channel_closes() {
        let (tx, rx) = mpsc::channel(4);
        let (state_tx, _state_rx) = broadcast::channel(4);
        let voice = Arc::new(RecordingVoice::default());
        let machine = StateMachine::new(fast_timing(), &ENGLISH, state_tx);
        let orchestrator = Orchestrator::new(
            machine,
            EchoPipeline {
                seen: Arc::default(),
            },
            voice.clone(),
            voice,
            &tx,
        );

        drop(tx);
        timeout(Duration::from_secs(1), orchestrator.run(rx))
            .await
            .expect("run returns once the channel is closed");
    }

    async fn run_cycle(h: &mut Harness, cycle: u64) {
        h.tx.send(TriggerEvent::ShakeDetected { g_force: 4.2 })
            .await
            .unwrap();
        assert!(matches!(next_event(&mut h.state_rx).await, StateEvent::Armed { .. }));
        next_event(&mut h.state_rx).await;
        h.tx.send(TriggerEvent::TranscriptReady {
            cycle,
            text: "light on".into(),
        })
        .await
        .unwrap();
        next_event(&mut h.state_rx).await;
        assert!(matches!(
            next_event(&mut h.state_rx).await,
            StateEvent::CycleComplete { cycle: c, .. } if c == cycle
        ));
    }

    #[tokio::test]
    async fn test_lost_pipeline_speaks_failure() {
        let mut h = start_with(
            RecordingVoice::default(),
            fast_timing(),
            CrashingPipeline,
            Arc::default(),
        );

        // The crashing cycle and every later one tell the user
        run_cycle(&mut h, 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        run_cycle(&mut h, 2).await;

        let failure = ENGLISH.actuation_failed.to_string();
        wait_until(|| h.voice.spoken.lock().unwrap().len() == 4).await;
        let spoken = h.voice.spoken.lock().unwrap().clone();
        assert_eq!(
            spoken,
            vec![
                ENGLISH.arm_prompt.to_string(),
                failure.clone(),
                ENGLISH.arm_prompt.to_string(),
                failure,
            ]
        );

        h.task.abort();
    }
}

