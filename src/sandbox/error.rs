//! Failures of the sandbox layer.
//!
//! The command layer wraps these in `anyhow` context; the predicates let it
//! pick a hint without matching on message text.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The daemon could not be reached or did not answer a ping.
    #[error("Docker daemon unreachable: {message}")]
    DockerUnavailable { message: String },

    #[error("Sandbox image {image} does not exist")]
    ImageNotFound { image: String },

    #[error("Sandbox image build failed: {message}")]
    BuildFailed { message: String },

    /// Any list, create, start, stop, remove or exec call that Docker rejected.
    #[error("Sandbox container error: {message}")]
    ContainerFailed { message: String },

    /// The command cannot be typed into the session as is.
    #[error("Command rejected: {message}")]
    InvalidCommand { message: String },

    #[error("No completion token after {limit:?}")]
    Timeout { limit: Duration },

    /// Another shellbox process holds the sandbox, or the lock file is unusable.
    #[error("Sandbox lock unavailable: {message}")]
    Lock { message: String },

    /// The host stopped waiting; the command may still be running.
    #[error("Stopped waiting for the command")]
    Cancelled,
}

impl SandboxError {
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    pub fn build_failed(message: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
        }
    }

    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout { limit }
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Lock { .. })
    }

    pub fn is_build_failed(&self) -> bool {
        matches!(self, Self::BuildFailed { .. })
    }

    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }
}
