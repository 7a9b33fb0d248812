//! Docker sandbox with a persistent shell session.
//!
//! One named container runs a detached `screen` session. Commands are typed
//! into that session, their output is redirected into a history file, and a
//! fresh sentinel token appended after it marks completion. Shell state (cwd,
//! exported variables, installed packages) survives between commands.

mod channel;
mod docker;
mod error;
mod image;
mod lifecycle;
mod lock;
#[cfg(test)]
pub(crate) mod mock;
mod network;
mod poller;
mod runtime;

pub(crate) use channel::CommandEncoding;
pub(crate) use docker::DockerRuntime;
pub(crate) use error::SandboxError;
pub(crate) use lifecycle::{ContainerHandle, Sandbox};
pub(crate) use network::NetworkPolicy;
pub(crate) use runtime::{ContainerState, ContainerSummary, ImageInfo};

use image::image_reference;

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{expand_path, SandboxConfig};

/// Names and paths that identify one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SandboxIdentity {
    pub container_name: String,
    /// Full image reference including the tag.
    pub image: String,
    pub session: String,
    pub history_path: String,
    pub script_path: String,
}

impl Default for SandboxIdentity {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl SandboxIdentity {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            container_name: config.name.clone(),
            image: image_reference(&config.image),
            session: config.session.clone(),
            history_path: config.history_path.clone(),
            script_path: config.script_path.clone(),
        }
    }
}

/// Delays used by the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timings {
    /// After starting a container, before the first command.
    pub settle: Duration,
    /// After typing a command, before polling.
    pub keystroke_delay: Duration,
    pub poll_interval: Duration,
    /// Upper bound on waiting for one command.
    pub timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl Timings {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            settle: Duration::from_millis(config.settle_ms),
            keystroke_delay: Duration::from_millis(config.keystroke_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Everything a [`Sandbox`] needs besides the runtime.
#[derive(Debug, Clone)]
pub(crate) struct SandboxOptions {
    pub identity: SandboxIdentity,
    /// Host directory bound into the container at the same path.
    pub project_dir: PathBuf,
    /// Base Dockerfile on the host.
    pub dockerfile: PathBuf,
    pub policy: NetworkPolicy,
    pub ports: Vec<u16>,
    pub encoding: CommandEncoding,
    pub timings: Timings,
    /// Advisory lock file shared by every process driving this container.
    pub lock_path: PathBuf,
}

/// Lock file for a container name. Container names are global to the
/// daemon, so the lock lives outside the project.
fn default_lock_path(container_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{container_name}.lock"))
}

impl SandboxOptions {
    /// Resolves configured paths against the project directory.
    pub fn from_config(config: &SandboxConfig, project_dir: &Path) -> Result<Self> {
        if config.network.policy == NetworkPolicy::WebOnly && config.network.ports.is_empty() {
            bail!(
                "network policy \"web-only\" needs at least one port in sandbox.network.ports; \
                 use \"deny\" to block all traffic or \"allow-all\" to disable filtering"
            );
        }

        let dockerfile = PathBuf::from(expand_path(&config.dockerfile)?);
        let dockerfile = if dockerfile.is_absolute() {
            dockerfile
        } else {
            project_dir.join(dockerfile)
        };

        Ok(Self {
            identity: SandboxIdentity::from_config(config),
            project_dir: project_dir.to_path_buf(),
            dockerfile,
            policy: config.network.policy,
            ports: config.network.ports.clone(),
            encoding: config.encoding,
            timings: Timings::from_config(config),
            lock_path: default_lock_path(&config.name),
        })
    }
}
