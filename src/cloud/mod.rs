//! Cloud IoT platform client
//!
//! Signed requests against the platform's OpenAPI: token acquisition and
//! command dispatch for a single dimmable colour light.

mod client;
mod command;
mod error;

pub use client::{CloudApiClient, Credentials, Region};
pub use error::DispatchError;
