//! The resolve-and-actuate pipeline run for each transcript
//!
//! The orchestrator moves the pipeline into a background task for the length
//! of one cycle and takes it back when the task completes, so the cloud
//! client's token is only ever touched by one cycle at a time.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, info, warn};

use crate::cloud::CloudApiClient;
use crate::dispatch::{ActionDispatcher, DispatchOutcome, Vocabulary};
use crate::intent::{IntentResolver, Utterance};

/// What a finished pipeline wants spoken, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub spoken: Vec<String>,
}

impl PipelineReport {
    fn say(text: impl Into<String>) -> Self {
        Self {
            spoken: vec![text.into()],
        }
    }
}

/// One cycle's worth of processing for a captured utterance
#[async_trait]
pub trait Pipeline: Send + 'static {
    async fn run(&mut self, utterance: Utterance) -> PipelineReport;
}

/// Authenticates if needed, resolves the intent and drives the light
pub struct LightPipeline {
    client: CloudApiClient,
    resolver: IntentResolver,
    dispatcher: ActionDispatcher,
    vocabulary: &'static Vocabulary,
}

impl LightPipeline {
    pub fn new(
        client: CloudApiClient,
        resolver: IntentResolver,
        vocabulary: &'static Vocabulary,
    ) -> Self {
        Self {
            client,
            resolver,
            dispatcher: ActionDispatcher::new(vocabulary),
            vocabulary,
        }
    }
}

#[async_trait]
impl Pipeline for LightPipeline {
    async fn run(&mut self, utterance: Utterance) -> PipelineReport {
        if !self.client.is_authenticated() {
            if let Err(err) = self.client.authenticate().await {
                warn!(?err, "cloud authentication failed");
                return PipelineReport::say(self.vocabulary.auth_failed);
            }
        }

        let fulfillment = self.resolver.resolve(&utterance).await;
        info!(
            fallback = self.resolver.is_sentinel(&fulfillment),
            reply = %fulfillment.text,
            "intent resolved"
        );

        let mut report =
            PipelineReport::say(decorate_reply(&fulfillment.text, self.vocabulary, Local::now()));

        match self
            .dispatcher
            .dispatch(&mut self.client, &fulfillment.text)
            .await
        {
            DispatchOutcome::Applied(action) => debug!(?action, "cycle actuated the light"),
            DispatchOutcome::Failed { action, notice } => {
                debug!(?action, "reporting failed light action");
                report.spoken.push(notice);
            }
            DispatchOutcome::NoAction => {}
        }

        report
    }
}

/// Append the local time to replies that announce it
pub fn decorate_reply<Tz>(text: &str, vocabulary: &Vocabulary, now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    if text.to_lowercase().contains(vocabulary.current_time_phrase) {
        format!("{} {}", text, now.format("%H:%M"))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::cloud::{Credentials, Region};
    use crate::dispatch::{ENGLISH, SPANISH};
    use crate::intent::{CredentialError, CredentialSource, ServiceCredentials};

    struct StaticCredentials;

    #[async_trait]
    impl CredentialSource for StaticCredentials {
        async fn load(&self) -> Result<ServiceCredentials, CredentialError> {
            Ok(ServiceCredentials {
                project_id: "home-agent".to_string(),
                bearer_token: "nlu-token".to_string(),
            })
        }
    }

    #[derive(Clone)]
    struct Cloud {
        token_ok: bool,
        command_status: StatusCode,
        fulfillment: Value,
        token_calls: Arc<AtomicUsize>,
        nlu_calls: Arc<AtomicUsize>,
        commands: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl Cloud {
        fn new(fulfillment: &str) -> Self {
            Self {
                token_ok: true,
                command_status: StatusCode::OK,
                fulfillment: json!({"queryResult": {"fulfillmentText": fulfillment}}),
                token_calls: Arc::default(),
                nlu_calls: Arc::default(),
                commands: Arc::default(),
            }
        }
    }

    async fn token(State(cloud): State<Cloud>) -> Json<Value> {
        cloud.token_calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({"success": cloud.token_ok, "result": {"access_token": "tok-9"}, "msg": "denied"}))
    }

    async fn commands(
        State(cloud): State<Cloud>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let token = headers
            .get("access_token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        cloud.commands.lock().unwrap().push((token, body));
        cloud.command_status
    }

    async fn detect_intent(State(cloud): State<Cloud>) -> Json<Value> {
        cloud.nlu_calls.fetch_add(1, Ordering::SeqCst);
        Json(cloud.fulfillment.clone())
    }

    async fn start_server(cloud: Cloud) -> (SocketAddr, JoinHandle<()>) {
        let router = Router::new()
            .route("/v1.0/token", get(token))
            .route("/v1.0/devices/:device_id/commands", post(commands))
            .route(
                "/v2/projects/:project/agent/sessions/:session",
                post(detect_intent),
            )
            .with_state(cloud);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, handle)
    }

    fn pipeline(addr: SocketAddr) -> LightPipeline {
        let base = format!("http://{addr}");
        let credentials = Credentials {
            access_id: "id".to_string(),
            access_secret: "secret".to_string(),
            region: Region::Eu,
            device_id: "lamp".to_string(),
        };
        let client = CloudApiClient::new(credentials, Duration::from_secs(5))
            .unwrap()
            .with_base_url(&base);
        let resolver =
            IntentResolver::new(Arc::new(StaticCredentials), &ENGLISH, Duration::from_secs(5))
                .unwrap()
                .with_base_url(&base);
        LightPipeline::new(client, resolver, &ENGLISH)
    }

    fn utterance(text: &str) -> Utterance {
        Utterance {
            text: text.to_string(),
            language_code: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_cycle_authenticates_and_dispatches() {
        let cloud = Cloud::new("Light activated");
        let (addr, handle) = start_server(cloud.clone()).await;
        let mut pipeline = pipeline(addr);

        let report = pipeline.run(utterance("turn on the light")).await;
        assert_eq!(report.spoken, vec!["Light activated".to_string()]);

        let commands = cloud.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "tok-9");
        assert_eq!(
            commands[0].1,
            json!({"commands": [{"code": "switch_led", "value": true}]})
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_token_is_reused_across_cycles() {
        let cloud = Cloud::new("Light deactivated");
        let (addr, handle) = start_server(cloud.clone()).await;
        let mut pipeline = pipeline(addr);

        pipeline.run(utterance("off")).await;
        pipeline.run(utterance("off")).await;
        assert_eq!(cloud.token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cloud.commands.lock().unwrap().len(), 2);

        handle.abort();
    }

    #[tokio::test]
    async fn test_auth_failure_skips_resolution() {
        let cloud = Cloud {
            token_ok: false,
            ..Cloud::new("Light activated")
        };
        let (addr, handle) = start_server(cloud.clone()).await;
        let mut pipeline = pipeline(addr);

        let report = pipeline.run(utterance("on")).await;
        assert_eq!(report.spoken, vec![ENGLISH.auth_failed.to_string()]);
        assert_eq!(cloud.nlu_calls.load(Ordering::SeqCst), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_command_failure_adds_notice_and_reauthenticates() {
        let cloud = Cloud {
            command_status: StatusCode::INTERNAL_SERVER_ERROR,
            ..Cloud::new("set color to green")
        };
        let (addr, handle) = start_server(cloud.clone()).await;
        let mut pipeline = pipeline(addr);

        let report = pipeline.run(utterance("green")).await;
        assert_eq!(
            report.spoken,
            vec![
                "set color to green".to_string(),
                ENGLISH.actuation_failed.to_string()
            ]
        );

        pipeline.run(utterance("green")).await;
        assert_eq!(cloud.token_calls.load(Ordering::SeqCst), 2);

        handle.abort();
    }

    #[test]
    fn test_time_reply_is_decorated() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 7, 0).unwrap();
        assert_eq!(
            decorate_reply("The current time is", &ENGLISH, now),
            "The current time is 09:07"
        );
        assert_eq!(
            decorate_reply("La hora actual es", &SPANISH, now),
            "La hora actual es 09:07"
        );
        assert_eq!(decorate_reply("Light activated", &ENGLISH, now), "Light activated");
    }
}
