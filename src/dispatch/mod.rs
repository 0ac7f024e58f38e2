//! Action dispatch: fulfillment text to light commands
//!
//! A pure keyword router ([`parse_action`]) picks at most one action; the
//! [`ActionDispatcher`] applies it and absorbs client failures.

mod action;
mod dispatcher;
mod vocabulary;

pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use vocabulary::{Language, Vocabulary};

#[cfg(test)]
pub use vocabulary::{ENGLISH, SPANISH};
