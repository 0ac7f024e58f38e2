//! Signed HTTP client for the cloud IoT platform
//!
//! Owns the credentials and the access token lifecycle. A token is obtained
//! with [`CloudApiClient::authenticate`]; command calls refuse to run without
//! one. Remote failures on a command call invalidate the token so the next
//! cycle re-authenticates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::signing::{self, SignInput, SIGN_METHOD};

use super::command::{CommandBatch, DeviceCommand, Hsv};
use super::error::{AuthError, DispatchError, TransportError};

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";
const APPLICATION_JSON: &str = "application/json";

/// Data center hosting the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    Eu,
    Cn,
    In,
}

impl Region {
    fn code(self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::Cn => "cn",
            Region::In => "in",
        }
    }

    /// Public API endpoint for this region
    pub fn base_url(self) -> String {
        format!("https://openapi.tuya{}.com", self.code())
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::Us
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "eu" => Ok(Region::Eu),
            "cn" => Ok(Region::Cn),
            "in" => Ok(Region::In),
            other => Err(format!("unknown region '{other}' (expected us, eu, cn or in)")),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Cloud project credentials, fixed for the process lifetime
#[derive(Clone)]
pub struct Credentials {
    pub access_id: String,
    pub access_secret: String,
    pub region: Region,
    pub device_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .field("region", &self.region)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Bearer token returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub obtained_at: DateTime<Utc>,
}

/// Authentication lifecycle of the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenState {
    #[default]
    Unauthenticated,
    Authenticated(AccessToken),
}

impl TokenState {
    fn token(&self) -> Option<&AccessToken> {
        match self {
            TokenState::Unauthenticated => None,
            TokenState::Authenticated(token) => Some(token),
        }
    }
}

/// A request with its signature material, built fresh for every call
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url_path: String,
    pub timestamp: String,
    pub nonce: String,
    pub body_hash: String,
    pub signature: String,
    pub headers: Vec<(&'static str, String)>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    success: bool,
    #[serde(default)]
    result: Option<TokenResult>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
}

/// Client for the signed cloud API
pub struct CloudApiClient {
    http: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    token: TokenState,
}

impl CloudApiClient {
    /// Create a client for the credentials' region. `timeout` applies to
    /// both connecting and the whole request.
    pub fn new(credentials: Credentials, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: credentials.region.base_url(),
            http,
            credentials,
            token: TokenState::Unauthenticated,
        })
    }

    /// Point the client at a different host
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[cfg(test)]
    pub fn token_state(&self) -> &TokenState {
        &self.token
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.token().is_some()
    }

    /// Drop the current token
    pub fn invalidate(&mut self) {
        if let Some(token) = self.token.token() {
            debug!(obtained_at = %token.obtained_at, "access token invalidated");
        }
        self.token = TokenState::Unauthenticated;
    }

    /// Obtain a fresh access token, replacing any previous one.
    ///
    /// On failure the client is left unauthenticated.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.token = TokenState::Unauthenticated;

        let request = self.sign_request(Method::GET, TOKEN_PATH, "", None);
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        debug!(path = TOKEN_PATH, "requesting access token");

        let response = apply_headers(self.http.get(url), &request.headers)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "token endpoint returned error status");
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(TransportError::from)?;
        let decoded: TokenResponse =
            serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))?;

        if !decoded.success {
            let reason = decoded.msg.unwrap_or_else(|| "unknown reason".to_string());
            warn!(%reason, "token request rejected");
            return Err(AuthError::Rejected { reason });
        }

        let value = decoded
            .result
            .map(|r| r.access_token)
            .ok_or_else(|| AuthError::Decode("missing result.access_token".to_string()))?;

        info!(token_len = value.len(), "access token obtained");
        self.token = TokenState::Authenticated(AccessToken {
            value,
            obtained_at: Utc::now(),
        });

        Ok(())
    }

    /// Send a batch of commands to the configured device as one request
    pub async fn send_command(&mut self, commands: &[DeviceCommand]) -> Result<(), DispatchError> {
        let token = self
            .token
            .token()
            .map(|t| t.value.clone())
            .ok_or(DispatchError::NotAuthenticated)?;

        let url_path = format!("/v1.0/devices/{}/commands", self.credentials.device_id);
        let body = serde_json::to_string(&CommandBatch { commands })
            .expect("device commands should serialize");

        let request = self.sign_request(Method::POST, &url_path, &body, Some(&token));
        let url = format!("{}{}", self.base_url, url_path);

        let result = self.post(url, &request, body).await;
        match &result {
            Ok(()) => debug!(path = %url_path, count = commands.len(), "commands accepted"),
            Err(err) if err.is_remote() => {
                warn!(?err, path = %url_path, "command request failed");
                self.invalidate();
            }
            Err(_) => {}
        }
        result
    }

    async fn post(
        &self,
        url: String,
        request: &SignedRequest,
        body: String,
    ) -> Result<(), DispatchError> {
        let response = apply_headers(self.http.post(url), &request.headers)
            .body(body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let text = response.text().await.map_err(TransportError::from)?;
        debug!(path = %request.url_path, status = status.as_u16(), "POST completed");

        if status != StatusCode::OK {
            return Err(DispatchError::Status {
                http_status: status.as_u16(),
                body: text,
            });
        }
        Ok(())
    }

    /// Turn the light on or off
    pub async fn set_power(&mut self, on: bool) -> Result<(), DispatchError> {
        self.send_command(&[DeviceCommand::SwitchLed(on)]).await
    }

    /// Set white brightness level, `[10, 1000]`
    pub async fn set_brightness(&mut self, level: u16) -> Result<(), DispatchError> {
        self.send_command(&[DeviceCommand::BrightValueV2(level)]).await
    }

    /// Set an HSV colour
    pub async fn set_color(
        &mut self,
        hue: u16,
        saturation: u16,
        value: u16,
    ) -> Result<(), DispatchError> {
        let hsv = Hsv {
            h: hue,
            s: saturation,
            v: value,
        };
        self.send_command(&[DeviceCommand::ColourDataV2(hsv)]).await
    }

    /// Switch to white light at `brightness`, turning the colour channel off
    /// in the same request
    pub async fn set_white(&mut self, brightness: u16) -> Result<(), DispatchError> {
        self.send_command(&[
            DeviceCommand::BrightValueV2(brightness.clamp(10, 1000)),
            DeviceCommand::ColourDataV2(Hsv::OFF),
        ])
        .await
    }

    fn sign_request(
        &self,
        method: Method,
        url_path: &str,
        body: &str,
        access_token: Option<&str>,
    ) -> SignedRequest {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().to_string();

        let signature = signing::sign(
            &self.credentials.access_secret,
            &self.credentials.access_id,
            access_token,
            SignInput {
                method: method.as_str(),
                url_path,
                timestamp: &timestamp,
                nonce: &nonce,
                body,
            },
        );

        let mut headers = vec![
            ("client_id", self.credentials.access_id.clone()),
            ("sign_method", SIGN_METHOD.to_string()),
            ("t", timestamp.clone()),
            ("nonce", nonce.clone()),
            ("sign", signature.clone()),
        ];
        if let Some(token) = access_token {
            headers.push(("access_token", token.to_string()));
        }

        let request = SignedRequest {
            method,
            url_path: url_path.to_string(),
            timestamp,
            nonce,
            body_hash: signing::content_hash(body),
            signature,
            headers,
        };
        trace!(
            method = %request.method,
            path = %request.url_path,
            t = %request.timestamp,
            nonce = %request.nonce,
            content_hash = %request.body_hash,
            sign = %request.signature,
            "request signed"
        );
        request
    }
}

fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &[(&'static str, String)],
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder.header(CONTENT_TYPE, APPLICATION_JSON)
}
