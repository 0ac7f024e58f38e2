//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::cloud::{Credentials, Region};
use crate::dispatch::Language;
use crate::sensor::DEFAULT_THRESHOLD_G;
use crate::state::TriggerTiming;

const ENV_PREFIX: &str = "VOICE_LIGHT_";
const DEFAULT_TOKEN_COMMAND: &str = "gcloud auth print-access-token";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Cloud project credentials and target device
    pub credentials: Credentials,

    /// Vocabulary, NLU language and speech locale
    pub language: Language,

    /// Service credential bundle for the NLU agent
    pub nlu_key_file: PathBuf,

    /// Shell command printing an NLU bearer token
    pub nlu_token_command: String,

    /// Minimum g-force that counts as a shake
    pub shake_threshold_g: f32,

    pub timing: TriggerTiming,

    /// Connect and read timeout for outbound HTTP
    pub http_timeout: Duration,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::from_lookup(&home, |name| std::env::var(name).ok())
    }

    /// Build a configuration from `lookup`, which resolves full variable
    /// names such as `VOICE_LIGHT_REGION`
    pub fn from_lookup<F>(home: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{ENV_PREFIX}{key} is required"));

        let data_dir = PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("voice-light");
        let socket_path = data_dir.join("daemon.sock");

        let credentials = Credentials {
            access_id: required("ACCESS_ID")?,
            access_secret: required("ACCESS_SECRET")?,
            region: parse_or(var("REGION"), Region::default()).context("invalid region")?,
            device_id: required("DEVICE_ID")?,
        };

        let language = parse_or(var("LANGUAGE"), Language::default()).context("invalid language")?;

        let nlu_key_file = var("NLU_KEY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("nlu-key.json"));
        let nlu_token_command =
            var("NLU_TOKEN_COMMAND").unwrap_or_else(|| DEFAULT_TOKEN_COMMAND.to_string());

        let shake_threshold_g = parse_or(var("SHAKE_THRESHOLD_G"), DEFAULT_THRESHOLD_G)
            .context("invalid shake threshold")?;
        if !(shake_threshold_g.is_finite() && shake_threshold_g > 0.0) {
            return Err(anyhow!("shake threshold must be positive, got {shake_threshold_g}"));
        }

        let defaults = TriggerTiming::default();
        let timing = TriggerTiming {
            cooldown: millis_or(var("COOLDOWN_MS"), defaults.cooldown)
                .context("invalid cooldown")?,
            arm_delay: millis_or(var("ARM_DELAY_MS"), defaults.arm_delay)
                .context("invalid arm delay")?,
            listen_timeout: millis_or(var("LISTEN_TIMEOUT_MS"), defaults.listen_timeout)
                .context("invalid listen timeout")?,
        };
        let http_timeout = millis_or(var("HTTP_TIMEOUT_MS"), DEFAULT_HTTP_TIMEOUT)
            .context("invalid HTTP timeout")?;

        Ok(Self {
            credentials,
            language,
            nlu_key_file,
            nlu_token_command,
            shake_threshold_g,
            timing,
            http_timeout,
            socket_path,
            data_dir,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e| anyhow!("{e}")),
        None => Ok(default),
    }
}

fn millis_or(raw: Option<String>, default: Duration) -> Result<Duration> {
    match raw {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .with_context(|| format!("'{raw}' is not a number of milliseconds")),
        None => Ok(default),
    }
}
