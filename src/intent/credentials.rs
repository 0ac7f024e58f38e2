//! Credential loading for the NLU service

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// What a detect-intent call needs to authenticate
#[derive(Clone)]
pub struct ServiceCredentials {
    pub project_id: String,
    pub bearer_token: String,
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("project_id", &self.project_id)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read key file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key file is not valid JSON")]
    Parse(#[from] serde_json::Error),

    #[error("key file has no project_id")]
    MissingProjectId,

    #[error("token command failed: {0}")]
    TokenCommand(String),
}

/// Source of NLU credentials, consulted on every call
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self) -> Result<ServiceCredentials, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(default)]
    project_id: Option<String>,
}

/// Reads the project id from a service-account key file and obtains a bearer
/// token by running a shell command (for example
/// `gcloud auth print-access-token`).
#[derive(Debug, Clone)]
pub struct KeyFileCredentials {
    key_file: PathBuf,
    token_command: String,
}

impl KeyFileCredentials {
    pub fn new(key_file: impl Into<PathBuf>, token_command: impl Into<String>) -> Self {
        Self {
            key_file: key_file.into(),
            token_command: token_command.into(),
        }
    }

    async fn project_id(&self) -> Result<String, CredentialError> {
        let raw = tokio::fs::read_to_string(&self.key_file)
            .await
            .map_err(|source| CredentialError::Read {
                path: self.key_file.clone(),
                source,
            })?;
        let key: KeyFile = serde_json::from_str(&raw)?;
        key.project_id
            .filter(|id| !id.is_empty())
            .ok_or(CredentialError::MissingProjectId)
    }

    async fn bearer_token(&self) -> Result<String, CredentialError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.token_command)
            .output()
            .await
            .map_err(|e| CredentialError::TokenCommand(e.to_string()))?;

        if !output.status.success() {
            return Err(CredentialError::TokenCommand(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::TokenCommand("empty token".to_string()));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialSource for KeyFileCredentials {
    async fn load(&self) -> Result<ServiceCredentials, CredentialError> {
        let project_id = self.project_id().await?;
        let bearer_token = self.bearer_token().await?;
        debug!(%project_id, "NLU credentials loaded");
        Ok(ServiceCredentials {
            project_id,
            bearer_token,
        })
    }
}
