//! # frag-core
//!
//! Core types for the Frag code-agent orchestration core.
//!
//! A job turns one prompt into a runnable fragment:
//!
//! - The user's prompt and recent history seed an [`AgentState`]
//! - A single coding agent writes files into an ephemeral sandbox
//! - The loop halts when the agent emits a [`COMPLETION_MARKER`] or hits its cap
//! - Exactly one [`NewMessage`] outcome is persisted per job
//!
//! Besides plain data and the shared error type, this crate holds the durable
//! step journal every other crate memoizes through.

pub mod config;
mod error;
pub mod fail_open;
pub mod steps;
mod tree;
mod types;

pub use config::FragConfig;
pub use error::{FragError, Result};
pub use steps::{FileJournal, MemoryJournal, StepJournal, StepRecord, Steps};
pub use tree::{file_tree, TreeItem};
pub use types::*;
