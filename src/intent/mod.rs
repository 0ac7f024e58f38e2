//! Intent resolution against the remote NLU agent

mod credentials;
mod resolver;

pub use credentials::KeyFileCredentials;
pub use resolver::{IntentResolver, Utterance};

#[cfg(test)]
pub use credentials::{CredentialError, CredentialSource, ServiceCredentials};
