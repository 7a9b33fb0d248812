use anyhow::{Context, Result};
use colored::Colorize;

use crate::sandbox::ContainerHandle;

use super::{load_project, open_sandbox};

pub(crate) fn format_restarted(handle: &ContainerHandle) -> String {
    format!(
        "{} Sandbox {} restarted with a fresh image ({})\n",
        "✓".green(),
        handle.name.cyan(),
        handle.id.get(..12).unwrap_or(&handle.id).dimmed()
    )
}

/// Rebuilds the image and replaces the sandbox container.
pub async fn run() -> Result<()> {
    let (project_dir, config) = load_project()?;
    let sandbox = open_sandbox(&config, &project_dir).await?;

    let handle = sandbox
        .restart_sandbox()
        .await
        .context("Failed to restart sandbox")?;
    print!("{}", format_restarted(&handle));
    Ok(())
}
