//! Delivers commands into the persistent screen session.
//!
//! Each command is wrapped in a composite line that redirects its output into
//! the history file and then appends a fresh sentinel token, whether the
//! command succeeded or not. The line is typed into the session with
//! `screen -X stuff`, so it runs in the session's long-lived shell.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::SandboxError;
use super::lifecycle::ContainerHandle;
use super::runtime::ContainerRuntime;
use super::SandboxIdentity;

/// How a command is carried through screen and the session shell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandEncoding {
    /// Base64 text decoded into a script file and sourced by the session shell
    #[default]
    Base64,
    /// Raw command text, escaped for screen only
    Escaped,
}

/// Random completion marker for one command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SentinelToken(pub(super) String);

impl SentinelToken {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("shellbox-{}", &id[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SentinelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escapes characters screen's command parser would otherwise interpret
/// (`$VAR` expansion, `^X` control notation, backslash escapes).
pub(crate) fn escape_for_screen(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for c in line.chars() {
        if matches!(c, '\\' | '$' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `<payload> > <history> 2>&1 && echo <token> >> <history> || echo <token> >> <history>`
pub(crate) fn composite_line(payload: &str, token: &SentinelToken, history_path: &str) -> String {
    let history = shell_words::quote(history_path);
    format!(
        "{payload} > {history} 2>&1 && echo {token} >> {history} || echo {token} >> {history}"
    )
}

/// Types commands into the session.
pub(crate) struct CommandChannel<'a> {
    runtime: &'a dyn ContainerRuntime,
    identity: &'a SandboxIdentity,
    encoding: CommandEncoding,
    keystroke_delay: Duration,
}

impl<'a> CommandChannel<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        identity: &'a SandboxIdentity,
        encoding: CommandEncoding,
        keystroke_delay: Duration,
    ) -> Self {
        Self {
            runtime,
            identity,
            encoding,
            keystroke_delay,
        }
    }

    /// Payload that runs `command` in the session shell.
    fn payload(&self, command: &str) -> Result<String, SandboxError> {
        match self.encoding {
            CommandEncoding::Base64 => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(command);
                let script = shell_words::quote(&self.identity.script_path);
                Ok(format!(
                    "echo {encoded} | base64 -d > {script} && . {script}"
                ))
            }
            CommandEncoding::Escaped => {
                if command.chars().any(char::is_control) {
                    return Err(SandboxError::invalid_command(
                        "control characters (including newlines) cannot be typed into the session; use base64 encoding",
                    ));
                }
                Ok(command.to_string())
            }
        }
    }

    /// Keystrokes for one command, ready for `screen -X stuff`.
    pub fn keystrokes(&self, command: &str, token: &SentinelToken) -> Result<String, SandboxError> {
        let line = composite_line(&self.payload(command)?, token, &self.identity.history_path);
        Ok(format!("{}\n", escape_for_screen(&line)))
    }

    /// Sends `command` and returns the token that will mark its completion.
    pub async fn send(
        &self,
        handle: &ContainerHandle,
        command: &str,
    ) -> Result<SentinelToken, SandboxError> {
        let token = SentinelToken::generate();
        let keystrokes = self.keystrokes(command, &token)?;

        debug!(container = %handle.name, token = %token, "Sending command: {}", command);

        // screen -X is silent on success and prints why it failed otherwise
        let reply = self
            .runtime
            .exec(
                &handle.id,
                vec![
                    "screen".to_string(),
                    "-S".to_string(),
                    self.identity.session.clone(),
                    "-X".to_string(),
                    "stuff".to_string(),
                    keystrokes,
                ],
            )
            .await?;
        let reply = reply.trim();
        if !reply.is_empty() {
            return Err(SandboxError::container_failed(format!(
                "screen session {} did not accept the command: {reply}",
                self.identity.session
            )));
        }

        tokio::time::sleep(self.keystroke_delay).await;
        Ok(token)
    }
}
