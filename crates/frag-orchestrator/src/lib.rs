//! # frag-orchestrator
//!
//! Job pipeline for Frag.
//!
//! This crate provides:
//! - The bounded control loop around the coding agent ([`Network`])
//! - Title and response generation after the loop halts
//! - The finalizer that persists exactly one outcome message per job
//! - [`JobRunner`], which retries jobs over a durable step journal
//! - Message stores and prompt submission

mod activity_logger;
mod finalizer;
mod job;
mod network;
mod post_process;
pub mod prompt;
mod state_machine;
mod store;
mod submit;

pub use activity_logger::ActivityLogger;
pub use finalizer::{is_error, outcome_message, Finalizer};
pub use job::{AgentModels, CodeAgentJob, JobRunner, CODE_AGENT, NETWORK_NAME};
pub use network::{Network, NetworkRun};
pub use post_process::{extract_output, PostProcessed, PostProcessor, RESPONSE_AGENT, TITLE_AGENT};
pub use state_machine::{route, transition, Action, Event, HaltReason, Route, State};
pub use store::{FileStore, MemoryStore, MessageStore};
pub use submit::submit_prompt;
