//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::spawner::{resolve_launch_command, SpawnConfig};
use crate::models::handshake::{Implementation, InitializeParams};
use crate::orchestrator::supervisor::{RetryPolicy, SupervisorConfig};
use crate::{AppError, Result};

/// How to launch the agent process.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Full shell command line; wins over `command` / `args`.
    #[serde(default)]
    pub launch_command: Option<String>,
    /// Agent executable.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for `command`; `--acp` when absent.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Working directory; the process cwd when absent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Start through the bounded retry loop.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Deadline for the `initialize` handshake.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
}

/// Permission policy.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionConfig {
    /// Answer every permission request with its first `allow*` option.
    #[serde(default)]
    pub auto_allow: bool,
}

/// How the host introduces itself during `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Client name.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Display title.
    #[serde(default = "default_client_title")]
    pub title: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            title: default_client_title(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_client_title() -> String {
    "ACP Host".into()
}

/// Global configuration parsed from `config.toml`. Every section is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent launch settings.
    #[serde(default = "default_agent")]
    pub agent: AgentConfig,
    /// Permission policy.
    #[serde(default)]
    pub permissions: PermissionConfig,
    /// Client identity.
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_agent() -> AgentConfig {
    AgentConfig {
        auto_start: default_true(),
        startup_timeout_seconds: default_startup_timeout_seconds(),
        ..AgentConfig::default()
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            permissions: PermissionConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and canonicalize. Call again after applying overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a zero startup timeout or a `cwd` that
    /// does not exist.
    pub fn validate(&mut self) -> Result<()> {
        if self.agent.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        if let Some(cwd) = &self.agent.cwd {
            let canonical = cwd
                .canonicalize()
                .map_err(|err| AppError::Config(format!("agent.cwd invalid: {err}")))?;
            self.agent.cwd = Some(canonical);
        }

        Ok(())
    }

    /// Resolved shell command line for the agent.
    #[must_use]
    pub fn launch_command(&self) -> String {
        resolve_launch_command(
            self.agent.launch_command.as_deref(),
            self.agent.command.as_deref(),
            self.agent.args.as_deref(),
        )
    }

    /// Working directory for the agent and its sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no `cwd` is configured and the
    /// process cwd cannot be determined.
    pub fn cwd(&self) -> Result<PathBuf> {
        match &self.agent.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => env::current_dir()
                .map_err(|err| AppError::Config(format!("cannot determine cwd: {err}"))),
        }
    }

    /// Spawn parameters for the agent.
    ///
    /// # Errors
    ///
    /// See [`GlobalConfig::cwd`].
    pub fn spawn_config(&self) -> Result<SpawnConfig> {
        Ok(SpawnConfig {
            command: self.launch_command(),
            cwd: self.cwd()?,
        })
    }

    /// Complete supervisor configuration with the default retry policy.
    ///
    /// # Errors
    ///
    /// See [`GlobalConfig::cwd`].
    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        Ok(SupervisorConfig {
            spawn: self.spawn_config()?,
            initialize: InitializeParams::new(Implementation {
                name: self.client.name.clone(),
                title: self.client.title.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
            }),
            startup_timeout: Duration::from_secs(self.agent.startup_timeout_seconds),
            auto_start: self.agent.auto_start,
            retry: RetryPolicy::default(),
        })
    }
}
