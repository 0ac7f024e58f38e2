//! Trigger state machine and orchestration
//!
//! Provides an explicit state machine with four states:
//! - Idle: waiting for a shake
//! - Armed: prompt spoken, listen delay running
//! - Listening: single-shot speech capture in progress
//! - Processing: intent resolution and light dispatch in progress
//!
//! Only one cycle is active at a time; shakes are dropped outside Idle.

mod machine;
mod pipeline;
mod runner;

pub use machine::{State, StateMachine, TriggerTiming};
pub use pipeline::LightPipeline;
pub use runner::Orchestrator;
