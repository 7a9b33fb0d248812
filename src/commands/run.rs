//! Run commands in the sandbox and print the transcript.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::batch::{commands_from_json, BatchRunner};
use crate::config::expand_path;

use super::{load_project, open_sandbox};

/// Reads a JSON array of commands from a file, or stdin for `-`.
fn read_json_commands(source: &str) -> Result<Vec<String>> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read commands from stdin")?;
        buf
    } else {
        fs::read_to_string(source)
            .with_context(|| format!("Failed to read commands file: {source}"))?
    };

    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse commands JSON: {source}"))?;
    commands_from_json(&value)
}

/// CLI flag wins over config; `~` is expanded.
fn resolve_workdir(flag: Option<String>, configured: Option<&str>) -> Result<Option<PathBuf>> {
    flag.as_deref()
        .or(configured)
        .map(|dir| expand_path(dir).map(PathBuf::from))
        .transpose()
}

/// Gathers positional commands and `--json` commands, in that order.
fn collect_commands(mut commands: Vec<String>, json: Option<&str>) -> Result<Vec<String>> {
    if let Some(source) = json {
        commands.extend(read_json_commands(source)?);
    }
    if commands.is_empty() {
        bail!("No commands given. Pass commands as arguments or with --json <FILE>");
    }
    Ok(commands)
}

/// Entry point for `shellbox run`.
pub async fn run(commands: Vec<String>, json: Option<String>, workdir: Option<String>) -> Result<()> {
    let (project_dir, config) = load_project()?;
    let commands = collect_commands(commands, json.as_deref())?;
    let workdir = resolve_workdir(workdir, config.sandbox.workdir.as_deref())?;

    let sandbox = open_sandbox(&config, &project_dir).await?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; the command keeps running inside the sandbox");
                cancel.cancel();
            }
        }
    });

    let result = BatchRunner::new(&sandbox)
        .with_workdir(workdir)
        .with_cancellation(cancel)
        .run_commands(&commands)
        .await;
    watcher.abort();

    let transcript = match result {
        Ok(transcript) => transcript,
        Err(e) if e.is_cancelled() => {
            bail!("Interrupted before the command finished; it may still be running in the sandbox")
        }
        Err(e) if e.is_timeout() => {
            return Err(anyhow::Error::new(e).context(
                "Command did not finish in time. Raise sandbox.timeout_secs or run `shellbox restart`",
            ))
        }
        Err(e) if e.is_lock() => {
            return Err(anyhow::Error::new(e)
                .context("Another shellbox command is still using the sandbox"))
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Sandbox run failed")),
    };
    print!("{transcript}");
    Ok(())
}
