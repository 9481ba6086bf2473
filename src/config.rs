//! Configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::session::DEFAULT_CONVERSATION_ID;
use crate::{AppError, Result};

/// Agent CLI invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary.
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments selecting the stream-json protocol on stdin and stdout.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Optional MCP configuration path passed as `--mcp-config`.
    #[serde(default)]
    pub mcp_config: Option<String>,
    /// Extra environment variables for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_program() -> String {
    "claude".into()
}

fn default_agent_args() -> Vec<String> {
    [
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
        "--dangerously-skip-permissions",
        "--verbose",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_agent_args(),
            mcp_config: None,
            env: BTreeMap::new(),
        }
    }
}

/// Timeout values in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum wait for the next chunk of agent output.
    #[serde(default = "default_read_seconds")]
    pub read_seconds: u64,
    /// Maximum wait for process exit after stdin is closed.
    #[serde(default = "default_exit_grace_seconds")]
    pub exit_grace_seconds: u64,
}

fn default_read_seconds() -> u64 {
    120
}

fn default_exit_grace_seconds() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_seconds: default_read_seconds(),
            exit_grace_seconds: default_exit_grace_seconds(),
        }
    }
}

fn default_conversation_id() -> String {
    DEFAULT_CONVERSATION_ID.into()
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BoxConfig {
    /// Root under which session workspaces and metadata are stored.
    pub workspace_root: PathBuf,
    /// Agent CLI invocation.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Read and exit timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Conversation id sent before the agent has reported one.
    #[serde(default = "default_conversation_id")]
    pub default_conversation_id: String,
}

impl BoxConfig {
    /// Configuration with defaults for everything but the workspace root.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            agent: AgentConfig::default(),
            timeouts: TimeoutConfig::default(),
            default_conversation_id: default_conversation_id(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-read timeout for agent output.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.read_seconds)
    }

    /// Grace period for process exit after stdin is closed.
    #[must_use]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.exit_grace_seconds)
    }

    /// Validate field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.read_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.read_seconds must be greater than zero".into(),
            ));
        }

        if self.agent.program.trim().is_empty() {
            return Err(AppError::Config("agent.program must not be empty".into()));
        }

        if self.default_conversation_id.trim().is_empty() {
            return Err(AppError::Config(
                "default_conversation_id must not be empty".into(),
            ));
        }

        if self.workspace_root.as_os_str().is_empty() {
            return Err(AppError::Config("workspace_root must not be empty".into()));
        }

        Ok(())
    }
}
