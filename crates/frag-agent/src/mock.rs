//! Scripted chat model for tests

use async_trait::async_trait;
use frag_core::{FragError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::ChatModel;
use crate::types::{ChatRequest, ModelResponse};

#[derive(Debug, Clone)]
enum Turn {
    Respond(ModelResponse),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    turns: VecDeque<Turn>,
    fallback: Option<ModelResponse>,
    requests: Vec<ChatRequest>,
}

/// Chat model that replays a fixed script
///
/// Turns are consumed in order. Once the script runs out the fallback
/// response is returned forever, or an error if none was set. Clones share
/// the script and the request log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response
    pub fn then(self, response: ModelResponse) -> Self {
        self.lock().turns.push_back(Turn::Respond(response));
        self
    }

    /// Queue a model failure
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.lock().turns.push_back(Turn::Fail(message.into()));
        self
    }

    /// Response used after the script is exhausted
    pub fn otherwise(self, response: ModelResponse) -> Self {
        self.lock().fallback = Some(response);
        self
    }

    /// Number of completed or failed calls so far
    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelResponse> {
        let mut script = self.lock();
        script.requests.push(request.clone());

        match script.turns.pop_front() {
            Some(Turn::Respond(response)) => Ok(response),
            Some(Turn::Fail(message)) => Err(FragError::Model(message)),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| FragError::Model("Scripted model has no more turns".to_string())),
        }
    }
}
