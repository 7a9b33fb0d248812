//! Keeps exactly one sandbox container alive and hands out sessions on it.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::channel::CommandChannel;
use super::error::SandboxError;
use super::image::ImageBuilder;
use super::lock::ProcessLock;
use super::network::bootstrap_command;
use super::poller::CompletionPoller;
use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};
use super::{SandboxIdentity, SandboxOptions};

/// A started sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// One sandbox identity bound to a runtime.
///
/// Lifecycle changes are serialized by `lifecycle`. A [`Session`] holds
/// `session` for as long as it lives, so commands from different callers
/// never interleave in the history file. Other processes are kept out by the
/// [`ProcessLock`] on `options.lock_path`. Lock order is session, process
/// lock, lifecycle.
pub(crate) struct Sandbox {
    runtime: Arc<dyn ContainerRuntime>,
    options: SandboxOptions,
    lifecycle: Mutex<()>,
    session: Mutex<()>,
}

impl Sandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: SandboxOptions) -> Self {
        Self {
            runtime,
            options,
            lifecycle: Mutex::new(()),
            session: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &SandboxIdentity {
        &self.options.identity
    }

    pub fn images(&self) -> ImageBuilder<'_> {
        ImageBuilder::new(
            self.runtime.as_ref(),
            &self.options.dockerfile,
            &self.options.identity.image,
            &self.options.identity.history_path,
        )
    }

    /// Current container for this identity, if any.
    pub async fn status(&self) -> Result<Option<ContainerSummary>, SandboxError> {
        let containers = self
            .runtime
            .list_containers(&self.options.identity.container_name)
            .await?;
        Ok(containers.into_iter().next())
    }

    async fn process_lock(&self) -> Result<ProcessLock, SandboxError> {
        let timings = self.options.timings;
        ProcessLock::acquire(&self.options.lock_path, timings.poll_interval, timings.timeout).await
    }

    /// Returns the running sandbox, creating it if needed.
    ///
    /// A running container is reused as is. A stopped one is removed first.
    pub async fn ensure_sandbox(&self) -> Result<ContainerHandle, SandboxError> {
        let _process = self.process_lock().await?;
        self.ensure_locked().await
    }

    /// [`Self::ensure_sandbox`] for a caller already holding the process lock.
    async fn ensure_locked(&self) -> Result<ContainerHandle, SandboxError> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(existing) = self.status().await? {
            if existing.state == ContainerState::Running {
                debug!("Reusing running sandbox {}", existing.id);
                return Ok(ContainerHandle {
                    id: existing.id,
                    name: existing.name,
                });
            }

            info!("Removing stopped sandbox container {}", existing.id);
            self.runtime.remove_container(&existing.id).await?;
            self.wait_until_gone().await?;
        }

        self.create_and_start().await
    }

    /// Rebuilds the image and replaces any existing container.
    pub async fn restart_sandbox(&self) -> Result<ContainerHandle, SandboxError> {
        let _session = self.session.lock().await;
        let _process = self.process_lock().await?;
        let _lifecycle = self.lifecycle.lock().await;

        self.images().build_image().await?;
        self.remove_all().await?;
        self.create_and_start().await
    }

    /// Stops and removes the sandbox. Returns whether one existed.
    pub async fn stop_sandbox(&self) -> Result<bool, SandboxError> {
        let _session = self.session.lock().await;
        let _process = self.process_lock().await?;
        let _lifecycle = self.lifecycle.lock().await;

        self.remove_all().await
    }

    /// Opens the session, starting the sandbox if needed.
    pub async fn open_session(&self) -> Result<Session<'_>, SandboxError> {
        let guard = self.session.lock().await;
        let process = self.process_lock().await?;
        let handle = self.ensure_locked().await?;
        Ok(Session {
            sandbox: self,
            handle,
            _process: process,
            _guard: guard,
        })
    }

    async fn remove_all(&self) -> Result<bool, SandboxError> {
        let containers = self
            .runtime
            .list_containers(&self.options.identity.container_name)
            .await?;
        let existed = !containers.is_empty();

        for container in containers {
            info!(
                "Stopping sandbox container {} ({})",
                container.id, container.state
            );
            self.runtime.stop_container(&container.id).await?;
            self.runtime.remove_container(&container.id).await?;
        }

        if existed {
            self.wait_until_gone().await?;
        }
        Ok(existed)
    }

    /// Auto-removal finishes asynchronously; the name must be free before reuse.
    async fn wait_until_gone(&self) -> Result<(), SandboxError> {
        let timings = self.options.timings;
        let deadline = tokio::time::Instant::now() + timings.timeout;

        while self.status().await?.is_some() {
            if tokio::time::Instant::now() >= deadline {
                return Err(SandboxError::container_failed(format!(
                    "container {} was not removed in time",
                    self.options.identity.container_name
                )));
            }
            tokio::time::sleep(timings.poll_interval).await;
        }
        Ok(())
    }

    fn container_spec(&self) -> ContainerSpec {
        let options = &self.options;
        ContainerSpec {
            name: options.identity.container_name.clone(),
            image: options.identity.image.clone(),
            cmd: bootstrap_command(options.policy, &options.ports, &options.identity.session),
            bind_dir: options.project_dir.clone(),
            privileged: true,
            auto_remove: true,
            tty: true,
            network_mode: options.policy.network_mode(),
        }
    }

    async fn create_and_start(&self) -> Result<ContainerHandle, SandboxError> {
        let image = self.images().get_or_create_image().await?;
        debug!("Using image {} ({})", self.options.identity.image, image.id);

        let spec = self.container_spec();
        let id = self.runtime.create_container(&spec).await?;
        self.runtime.start_container(&id).await?;

        info!(
            "Started sandbox {} ({}) with network policy {}",
            spec.name, id, self.options.policy
        );

        tokio::time::sleep(self.options.timings.settle).await;

        Ok(ContainerHandle {
            id,
            name: spec.name,
        })
    }
}

/// Exclusive use of the sandbox's shell session.
pub(crate) struct Session<'a> {
    sandbox: &'a Sandbox,
    handle: ContainerHandle,
    _process: ProcessLock,
    _guard: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Session<'_> {
    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Runs one command in the session and returns its captured output.
    pub async fn run(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SandboxError> {
        let options = &self.sandbox.options;
        let runtime = self.sandbox.runtime.as_ref();

        let channel = CommandChannel::new(
            runtime,
            &options.identity,
            options.encoding,
            options.timings.keystroke_delay,
        );
        let poller = CompletionPoller::new(
            runtime,
            &options.identity.history_path,
            options.timings.poll_interval,
            options.timings.timeout,
        );

        let token = channel.send(&self.handle, command).await?;
        poller.await_token(&self.handle, &token, cancel).await
    }
}
