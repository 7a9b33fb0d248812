//! Container runtime abstraction.
//!
//! The lifecycle manager, command channel and poller only talk to Docker
//! through [`ContainerRuntime`], so tests can swap in an in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use super::error::SandboxError;

/// Result alias for runtime calls.
pub(crate) type RuntimeResult<T> = Result<T, SandboxError>;

/// Observer for build progress lines.
pub(crate) type BuildProgress<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Image metadata returned by list and inspect calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImageInfo {
    pub id: String,
    pub repo_tags: Vec<String>,
    /// Size in bytes, when the runtime reports it.
    pub size: Option<i64>,
}

impl ImageInfo {
    /// Exact-string membership test against the repo tag list.
    pub fn has_tag(&self, reference: &str) -> bool {
        self.repo_tags.iter().any(|tag| tag == reference)
    }
}

/// Coarse container state as far as the lifecycle manager cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerState {
    Running,
    Stopped,
}

impl ContainerState {
    /// Maps Docker's state string ("running", "exited", "created", ...).
    pub fn from_docker(state: Option<&str>) -> Self {
        match state {
            Some("running") => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One entry from a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    /// Unix timestamp of creation, when the runtime reports it.
    pub created: Option<i64>,
}

/// Everything needed to create the sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// Host directory bound at the identical path inside the container.
    pub bind_dir: PathBuf,
    pub privileged: bool,
    pub auto_remove: bool,
    pub tty: bool,
    /// `None` keeps Docker's default bridge network.
    pub network_mode: Option<String>,
}

/// A build request: tar context plus the Dockerfile name inside it.
#[derive(Debug, Clone)]
pub(crate) struct BuildRequest {
    pub tag: String,
    pub dockerfile: String,
    pub context: Bytes,
}

/// Container runtime operations consumed by the sandbox.
#[async_trait]
pub(crate) trait ContainerRuntime: Send + Sync {
    /// Lists all local images.
    async fn list_images(&self) -> RuntimeResult<Vec<ImageInfo>>;

    /// Builds an image, reporting progress lines to `progress`.
    async fn build_image(
        &self,
        request: BuildRequest,
        progress: BuildProgress<'_>,
    ) -> RuntimeResult<()>;

    /// Inspects an image by reference.
    async fn inspect_image(&self, reference: &str) -> RuntimeResult<ImageInfo>;

    /// Lists containers (running or not) whose name is exactly `name`.
    async fn list_containers(&self, name: &str) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stops a container. Already-stopped or missing containers are not an error.
    async fn stop_container(&self, id: &str) -> RuntimeResult<()>;

    /// Force-removes a container. Missing containers are not an error.
    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    /// Runs `cmd` (argv, no shell) inside the container and returns the
    /// combined stdout/stderr once the exec stream ends.
    async fn exec(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<String>;
}
