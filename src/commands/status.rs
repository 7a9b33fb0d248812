use anyhow::Result;
use chrono::DateTime;
use colored::Colorize;

use crate::sandbox::{ContainerState, ContainerSummary};

use super::{load_project, open_sandbox};

/// Renders the sandbox container status block.
pub(crate) fn format_status(name: &str, container: Option<&ContainerSummary>) -> String {
    let Some(container) = container else {
        return format!(
            "\n{} No sandbox container named {}.\n  Run {} to start one.\n",
            "ℹ".blue(),
            name.cyan(),
            "shellbox run <COMMAND>".green()
        );
    };

    let state = match container.state {
        ContainerState::Running => container.state.to_string().green().bold(),
        ContainerState::Stopped => container.state.to_string().red(),
    };

    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "━".repeat(50).dimmed()));
    out.push_str(&format!("{}\n", "   Sandbox Status".yellow().bold()));
    out.push_str(&format!("{}\n", "━".repeat(50).dimmed()));
    out.push_str(&format!("  Container:  {}\n", container.name.cyan()));
    out.push_str(&format!("  State:      {state}\n"));
    out.push_str(&format!("  Image:      {}\n", container.image.cyan()));
    out.push_str(&format!("  ID:         {}\n", short_id(&container.id).cyan()));

    if let Some(created) = container
        .created
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    {
        out.push_str(&format!(
            "  Created:    {}\n",
            created.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
        ));
    }

    out.push_str(&format!("{}\n", "━".repeat(50).dimmed()));
    out
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub async fn run() -> Result<()> {
    let (project_dir, config) = load_project()?;
    let sandbox = open_sandbox(&config, &project_dir).await?;

    let container = sandbox.status().await?;
    print!(
        "{}",
        format_status(&sandbox.identity().container_name, container.as_ref())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(state: ContainerState) -> ContainerSummary {
        ContainerSummary {
            id: "0123456789abcdef0123".to_string(),
            name: "shellbox-sandbox".to_string(),
            image: "shellbox-sandbox:latest".to_string(),
            state,
            created: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_format_status_missing() {
        colored::control::set_override(false);
        let out = format_status("shellbox-sandbox", None);
        assert!(out.contains("No sandbox container named shellbox-sandbox"));
        assert!(out.contains("shellbox run"));
    }

    #[test]
    fn test_format_status_running() {
        colored::control::set_override(false);
        let out = format_status("shellbox-sandbox", Some(&summary(ContainerState::Running)));
        assert!(out.contains("Container:  shellbox-sandbox"));
        assert!(out.contains("State:      running"));
        assert!(out.contains("ID:         0123456789ab\n"));
        assert!(out.contains("Created:    2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn test_format_status_without_created() {
        colored::control::set_override(false);
        let mut container = summary(ContainerState::Stopped);
        container.created = None;
        container.id = "abc".to_string();
        let out = format_status("shellbox-sandbox", Some(&container));
        assert!(out.contains("State:      stopped"));
        assert!(out.contains("ID:         abc"));
        assert!(!out.contains("Created:"));
    }
}
