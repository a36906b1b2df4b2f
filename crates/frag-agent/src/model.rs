//! Chat-model abstraction

use async_trait::async_trait;
use frag_core::Result;

use crate::types::{ChatRequest, ModelResponse};

/// Anything that can answer a [`ChatRequest`]
///
/// Implementations must be stateless across calls; the conversation is
/// carried entirely in the request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelResponse>;
}
