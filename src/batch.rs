//! Runs a list of commands through one sandbox session.
//!
//! Commands run strictly in order: each one is sent, awaited, and appended
//! to the transcript before the next is typed.

use anyhow::{bail, Result};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sandbox::{Sandbox, SandboxError};

/// One transcript block: the command line, its output, a blank line.
pub(crate) fn format_block(command: &str, output: &str) -> String {
    format!("> {command}\n{output}\n\n")
}

/// Extracts commands from a JSON array. Non-string entries are skipped.
pub(crate) fn commands_from_json(value: &Value) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        bail!("Expected a JSON array of commands");
    };

    Ok(items
        .iter()
        .filter_map(|item| item.as_str().map(String::from))
        .collect())
}

/// `cd` into `dir`, quoted for the session shell.
fn cd_command(dir: &std::path::Path) -> String {
    format!("cd {}", shell_words::quote(&dir.display().to_string()))
}

/// Sequences commands through a sandbox session.
pub(crate) struct BatchRunner<'a> {
    sandbox: &'a Sandbox,
    workdir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl<'a> BatchRunner<'a> {
    pub fn new(sandbox: &'a Sandbox) -> Self {
        Self {
            sandbox,
            workdir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Directory to `cd` into before the first command.
    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `commands` and returns the concatenated transcript.
    pub async fn run_commands(&self, commands: &[String]) -> Result<String, SandboxError> {
        info!("Running {} command(s) in sandbox", commands.len());

        let session = self.sandbox.open_session().await?;
        debug!("Session open on container {}", session.handle().id);

        if let Some(dir) = &self.workdir {
            let output = session.run(&cd_command(dir), &self.cancel).await?;
            debug!("cd {}: {:?}", dir.display(), output);
        }

        let mut transcript = String::new();
        for command in commands {
            let output = session.run(command, &self.cancel).await?;
            transcript.push_str(&format_block(command, &output));
        }

        Ok(transcript)
    }
}
