//! API key lookup for the chat-completion provider
//!
//! The key is never stored in config. Config names the environment variable
//! (`provider.api_key_env`, default `OPENAI_API_KEY`) and the key is read from
//! it when a client is built.

use frag_core::{FragError, Result};
use std::env;

/// Read the API key from `var`
///
/// Blank values count as missing.
pub fn api_key_from_env(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", var);
            Ok(key.trim().to_string())
        }
        _ => Err(FragError::Auth(format!(
            "No API key found. Set {}=sk-... or change provider.api_key_env in .frag/config.toml",
            var
        ))),
    }
}
