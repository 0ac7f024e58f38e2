//! Remote intent resolution
//!
//! Sends an utterance to the NLU agent's detect-intent endpoint and returns
//! the fulfillment text. Never fails: every error collapses into a sentinel
//! string from the vocabulary, which callers compare against.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatch::Vocabulary;

use super::credentials::{CredentialError, CredentialSource};

const DEFAULT_BASE_URL: &str = "https://dialogflow.googleapis.com";

/// Transcribed speech handed to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language_code: String,
}

/// The agent's reply, or a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentResult {
    pub text: String,
}

impl FulfillmentResult {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Internal failure, never returned past [`IntentResolver::resolve`]
#[derive(Debug, thiserror::Error)]
enum ResolutionError {
    #[error("credentials unavailable")]
    Credentials(#[from] CredentialError),

    #[error("detect-intent request failed")]
    Transport(#[from] reqwest::Error),

    #[error("detect-intent returned HTTP {0}")]
    Status(u16),

    #[error("malformed detect-intent response")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentResponse {
    query_result: QueryResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    #[serde(default)]
    fulfillment_text: Option<String>,
}

/// Client for the NLU detect-intent endpoint
pub struct IntentResolver {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
    base_url: String,
    vocabulary: &'static Vocabulary,
}

impl IntentResolver {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        vocabulary: &'static Vocabulary,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            vocabulary,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve `utterance` to fulfillment text.
    ///
    /// Each call opens a new session. A missing fulfillment field yields the
    /// vocabulary's "not understood" phrase; any failure yields its
    /// "resolution failed" phrase.
    pub async fn resolve(&self, utterance: &Utterance) -> FulfillmentResult {
        match self.try_resolve(utterance).await {
            Ok(Some(text)) => FulfillmentResult::new(text),
            Ok(None) => {
                debug!("response carried no fulfillment text");
                FulfillmentResult::new(self.vocabulary.not_understood)
            }
            Err(err) => {
                warn!(?err, "intent resolution failed");
                FulfillmentResult::new(self.vocabulary.resolution_failed)
            }
        }
    }

    /// Whether `result` is one of the fallback phrases rather than an agent reply
    pub fn is_sentinel(&self, result: &FulfillmentResult) -> bool {
        result.text == self.vocabulary.not_understood
            || result.text == self.vocabulary.resolution_failed
    }

    async fn try_resolve(&self, utterance: &Utterance) -> Result<Option<String>, ResolutionError> {
        let creds = self.credentials.load().await?;
        let session_id = Uuid::new_v4();
        let url = format!(
            "{}/v2/projects/{}/agent/sessions/{}:detectIntent",
            self.base_url, creds.project_id, session_id
        );

        let body = json!({
            "queryInput": {
                "text": {
                    "text": utterance.text,
                    "languageCode": utterance.language_code,
                }
            }
        });

        debug!(project_id = %creds.project_id, %session_id, "sending detect-intent request");
        let response = self
            .http
            .post(url)
            .bearer_auth(&creds.bearer_token)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        let decoded: DetectIntentResponse = serde_json::from_str(&text)?;
        Ok(decoded.query_result.fulfillment_text)
    }
}
