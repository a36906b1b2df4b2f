//! Configuration management for Frag
//!
//! Loaded from `.frag/config.toml` in the working directory. Every field has a
//! default so a missing file or a partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{FragError, Result};

/// Directory holding config, sandboxes, journals and the message store
pub const FRAG_DIR: &str = ".frag";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

/// Control loop bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Hard cap on coding-agent invocations per job
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
}

/// Sandbox provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Template the sandbox is created from
    #[serde(default = "default_template")]
    pub template: String,

    /// Idle timeout set on creation
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Port the generated app is served on
    #[serde(default = "default_preview_port")]
    pub preview_port: u16,

    /// Where local sandboxes live (relative to the working directory)
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,

    /// `{port}` and `{id}` are substituted
    #[serde(default = "default_host_template")]
    pub host_template: String,
}

/// One agent's model binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentModelConfig {
    pub model: String,

    #[serde(default)]
    pub temperature: Option<f32>,
}

impl AgentModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Model selection per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_code_agent_model")]
    pub code_agent: AgentModelConfig,

    #[serde(default = "default_post_process_model")]
    pub title: AgentModelConfig,

    #[serde(default = "default_post_process_model")]
    pub response: AgentModelConfig,
}

/// Chat-completion provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Step runner behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Whole-job attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

/// Conversation seeding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How many prior messages seed the conversation
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

// Default value providers
fn default_max_iter() -> usize {
    15
}

fn default_template() -> String {
    "nextjs-venu-web-ai-test".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    60 * 10 * 3
}

fn default_preview_port() -> u16 {
    3000
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from(FRAG_DIR).join("sandboxes")
}

fn default_host_template() -> String {
    "{port}-{id}.localhost".to_string()
}

fn default_code_agent_model() -> AgentModelConfig {
    AgentModelConfig::new("gpt-4.1").with_temperature(0.1)
}

fn default_post_process_model() -> AgentModelConfig {
    AgentModelConfig::new("gpt-4o")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

fn default_max_attempts() -> usize {
    3
}

fn default_history_limit() -> usize {
    5
}

impl FragConfig {
    /// Load configuration from `.frag/config.toml` under `root`, or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(FRAG_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FragError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.frag/config.toml` under `root`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(FRAG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| FragError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.network.max_iter == 0 {
            return Err(FragError::Config("network.max_iter must be at least 1".to_string()));
        }
        if self.runner.max_attempts == 0 {
            return Err(FragError::Config(
                "runner.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            idle_timeout_secs: default_idle_timeout_secs(),
            preview_port: default_preview_port(),
            root: default_sandbox_root(),
            host_template: default_host_template(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            code_agent: default_code_agent_model(),
            title: default_post_process_model(),
            response: default_post_process_model(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}
