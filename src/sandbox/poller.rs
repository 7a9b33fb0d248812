//! Waits for a sentinel token to show up in the history file.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::channel::SentinelToken;
use super::error::SandboxError;
use super::lifecycle::ContainerHandle;
use super::runtime::ContainerRuntime;

/// Text before the first occurrence of `token`, if the token is present.
pub(crate) fn extract_output(buffer: &str, token: &SentinelToken) -> Option<String> {
    buffer
        .split_once(token.as_str())
        .map(|(before, _)| before.to_string())
}

/// Polls the history file until a command's token appears.
pub(crate) struct CompletionPoller<'a> {
    runtime: &'a dyn ContainerRuntime,
    history_path: &'a str,
    poll_interval: Duration,
    timeout: Duration,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        history_path: &'a str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            history_path,
            poll_interval,
            timeout,
        }
    }

    async fn read_history(&self, handle: &ContainerHandle) -> Result<String, SandboxError> {
        self.runtime
            .exec(
                &handle.id,
                vec!["cat".to_string(), self.history_path.to_string()],
            )
            .await
    }

    async fn poll(
        &self,
        handle: &ContainerHandle,
        token: &SentinelToken,
    ) -> Result<String, SandboxError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let buffer = self.read_history(handle).await?;
            if let Some(output) = extract_output(&buffer, token) {
                debug!(token = %token, attempts, "Command completed");
                return Ok(output);
            }
            trace!(token = %token, attempts, "Token not found yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns the command output once `token` is seen.
    ///
    /// Gives up with [`SandboxError::Timeout`] after the configured timeout and
    /// with [`SandboxError::Cancelled`] when `cancel` fires. The command itself
    /// keeps running inside the session either way.
    pub async fn await_token(
        &self,
        handle: &ContainerHandle,
        token: &SentinelToken,
        cancel: &CancellationToken,
    ) -> Result<String, SandboxError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SandboxError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.poll(handle, token)) => {
                result.unwrap_or_else(|_| Err(SandboxError::timeout(self.timeout)))
            }
        }
    }
}
