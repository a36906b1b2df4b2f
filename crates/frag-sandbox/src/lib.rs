//! # frag-sandbox
//!
//! Sandbox session handles for Frag code agents.
//!
//! A job creates exactly one sandbox and then only ever holds its
//! [`SandboxId`](frag_core::SandboxId). Every tool step re-resolves the id
//! through a [`SandboxProvider`], because durable steps may run on different
//! workers. Resolving an expired sandbox fails with
//! [`FragError::SessionUnavailable`](frag_core::FragError::SessionUnavailable).

mod local;
mod mock;
mod provider;

pub use local::{resolve_path, LocalProvider};
pub use mock::{MockCommand, MockSandbox};
pub use provider::{CommandOutput, OutputBuffers, OutputSink, SandboxProvider, SandboxSession};
