//! CLI command implementations.
//!
//! Each submodule implements a shellbox CLI command with pure formatting
//! separated from IO for testability.

pub mod image;
pub mod restart;
pub mod run;
pub mod status;
pub mod stop;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::sandbox::{DockerRuntime, Sandbox, SandboxOptions};

/// Project directory and its configuration.
pub(crate) fn load_project() -> Result<(PathBuf, Config)> {
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&project_dir)?;
    Ok((project_dir, config))
}

/// Connects to Docker and binds the configured sandbox to it.
pub(crate) async fn open_sandbox(config: &Config, project_dir: &Path) -> Result<Sandbox> {
    let options = SandboxOptions::from_config(&config.sandbox, project_dir)?;
    let runtime = DockerRuntime::connect().await.map_err(|e| {
        let hint = if e.is_docker_unavailable() {
            "shellbox needs a running Docker daemon"
        } else {
            "Failed to open Docker runtime"
        };
        anyhow::Error::new(e).context(hint)
    })?;
    Ok(Sandbox::new(Arc::new(runtime), options))
}
