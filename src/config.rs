use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::sandbox::{CommandEncoding, NetworkPolicy};

const CONFIG_FILE: &str = "shellbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container name; exactly one container with this name is kept alive
    #[serde(default = "default_name")]
    pub name: String,

    /// Image reference built and used for the container
    #[serde(default = "default_image")]
    pub image: String,

    /// Base Dockerfile, relative to the project directory
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Name of the screen session inside the container
    #[serde(default = "default_session")]
    pub session: String,

    /// File inside the container that receives command output
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// File inside the container that holds the decoded command (base64 encoding)
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Directory to `cd` into before each batch (optional, `~` expanded)
    #[serde(default)]
    pub workdir: Option<String>,

    /// How commands are delivered to the session
    #[serde(default)]
    pub encoding: CommandEncoding,

    /// Pause after starting the container (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub settle_ms: u64,

    /// Pause after typing a command into the session (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub keystroke_delay_ms: u64,

    /// Pause between history reads (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub poll_interval_ms: u64,

    /// Give up waiting for a single command after this many seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            image: default_image(),
            dockerfile: default_dockerfile(),
            session: default_session(),
            history_path: default_history_path(),
            script_path: default_script_path(),
            workdir: None,
            encoding: CommandEncoding::default(),
            settle_ms: default_delay_ms(),
            keystroke_delay_ms: default_delay_ms(),
            poll_interval_ms: default_delay_ms(),
            timeout_secs: default_timeout_secs(),
            network: NetworkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network policy
    #[serde(default)]
    pub policy: NetworkPolicy,

    /// Outbound TCP ports covered by the web-only filter
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            policy: NetworkPolicy::default(),
            ports: default_ports(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "shellbox-sandbox".to_string()
}

fn default_image() -> String {
    "shellbox-sandbox:latest".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_session() -> String {
    "sandbox".to_string()
}

fn default_history_path() -> String {
    "/tmp/shellbox-history".to_string()
}

fn default_script_path() -> String {
    "/tmp/shellbox-command".to_string()
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_ports() -> Vec<u16> {
    vec![80, 443]
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).display().to_string())
    } else if path == "~" {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.display().to_string())
    } else {
        Ok(path.to_string())
    }
}
