//! Configuration types for shellgrid.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Dimensions, Error};

/// Client configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(default)]
pub struct ClientConfig {
    /// Orchestrator settings
    pub orchestrator: OrchestratorSettings,
    /// Terminal settings
    pub terminal: TerminalSettings,
    /// Multiplexer auto-attach settings
    pub auto_attach: AutoAttachSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl ClientConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ClientConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.orchestrator.validate()?;

        if self.terminal.default_rows == 0 || self.terminal.default_cols == 0 {
            return Err(Error::Config("terminal dimensions must be > 0".to_string()));
        }

        self.auto_attach.validate()?;

        Ok(())
    }
}

/// Session orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Keep-alive interval while the host application is in the foreground
    pub keep_alive_foreground_secs: u64,
    /// Keep-alive interval while the host application is in the background
    pub keep_alive_background_secs: u64,
    /// Delay before each automatic reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Period of the snapshot persistence timer
    pub persist_interval_secs: u64,
    /// Capacity of each event broadcast channel
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            keep_alive_foreground_secs: 30,
            keep_alive_background_secs: 60,
            reconnect_delay_ms: 5000,
            max_reconnect_attempts: 3,
            persist_interval_secs: 10,
            event_capacity: 1024,
        }
    }
}

impl OrchestratorSettings {
    /// Keep-alive interval for the given foreground/background mode.
    pub fn keep_alive_interval(&self, background: bool) -> Duration {
        if background {
            Duration::from_secs(self.keep_alive_background_secs)
        } else {
            Duration::from_secs(self.keep_alive_foreground_secs)
        }
    }

    /// Delay before a reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Persistence timer period.
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Config(
                "orchestrator.max_sessions must be > 0".to_string(),
            ));
        }
        if self.keep_alive_foreground_secs == 0 || self.keep_alive_background_secs == 0 {
            return Err(Error::Config(
                "keep-alive intervals must be > 0".to_string(),
            ));
        }
        if self.persist_interval_secs == 0 {
            return Err(Error::Config(
                "orchestrator.persist_interval_secs must be > 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "orchestrator.event_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TerminalSettings {
    /// Default terminal rows
    pub default_rows: u16,
    /// Default terminal columns
    pub default_cols: u16,
    /// Scrollback buffer lines
    pub scrollback_lines: usize,
    /// Longest a renderer read waits for the grid lock
    pub read_timeout_ms: u64,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            default_rows: 24,
            default_cols: 80,
            scrollback_lines: 10_000,
            read_timeout_ms: 10,
        }
    }
}

impl TerminalSettings {
    /// Default grid dimensions.
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.default_rows, self.default_cols)
    }

    /// Renderer read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Attach-or-create multiplexer command sent after connecting.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AutoAttachSettings {
    /// Send the command after each successful connect
    pub enabled: bool,
    /// Multiplexer session name
    pub session_name: String,
    /// Delay after connect so the remote shell is ready
    pub delay_ms: u64,
}

impl Default for AutoAttachSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            session_name: "main".to_string(),
            delay_ms: 500,
        }
    }
}

impl AutoAttachSettings {
    /// The literal command line sent to the remote shell.
    pub fn command(&self) -> String {
        format!("tmux new-session -A -s {}\n", self.session_name)
    }

    /// Delay before sending the command.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.session_name.trim().is_empty() {
            return Err(Error::Config(
                "auto_attach.session_name cannot be empty".to_string(),
            ));
        }
        if self.session_name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "auto_attach.session_name '{}' cannot contain whitespace",
                self.session_name
            )));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
