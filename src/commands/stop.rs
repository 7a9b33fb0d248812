use anyhow::{Context, Result};
use colored::Colorize;

use super::{load_project, open_sandbox};

pub(crate) fn format_stopped(name: &str, removed: bool) -> String {
    if removed {
        format!("{} Sandbox {} stopped and removed\n", "✓".green(), name.cyan())
    } else {
        format!("{} No sandbox container named {}\n", "ℹ".blue(), name.cyan())
    }
}

/// Stops and removes the sandbox container, if any.
pub async fn run() -> Result<()> {
    let (project_dir, config) = load_project()?;
    let sandbox = open_sandbox(&config, &project_dir).await?;

    let removed = sandbox
        .stop_sandbox()
        .await
        .context("Failed to stop sandbox")?;
    print!(
        "{}",
        format_stopped(&sandbox.identity().container_name, removed)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stopped() {
        colored::control::set_override(false);
        assert_eq!(
            format_stopped("shellbox-sandbox", true),
            "✓ Sandbox shellbox-sandbox stopped and removed\n"
        );
        assert_eq!(
            format_stopped("shellbox-sandbox", false),
            "ℹ No sandbox container named shellbox-sandbox\n"
        );
    }
}
