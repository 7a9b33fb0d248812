//! Docker-backed [`ContainerRuntime`] built on bollard.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::error::SandboxError;
use super::runtime::{
    BuildProgress, BuildRequest, ContainerRuntime, ContainerSpec, ContainerState,
    ContainerSummary, ImageInfo, RuntimeResult,
};

/// Grace period before Docker kills a container on stop.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Talks to the local Docker daemon.
pub(crate) struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local daemon and checks that it answers.
    pub async fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::docker_unavailable(format!(
                "failed to connect to Docker ({e}). Is Docker running?"
            ))
        })?;

        docker.ping().await.map_err(|e| {
            SandboxError::docker_unavailable(format!(
                "cannot ping Docker daemon ({e}). Is Docker running?"
            ))
        })?;

        Ok(Self { docker })
    }
}

/// Status codes Docker uses when the container is already gone or going.
fn is_gone(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn failed(action: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::container_failed(format!("{action}: {err}"))
}

/// Drains an attached exec stream and decodes it once.
///
/// Chunks split at arbitrary byte offsets, so a multi-byte character may
/// straddle two of them.
async fn collect_output<S>(mut stream: S) -> RuntimeResult<String>
where
    S: Stream<Item = Result<LogOutput, BollardError>> + Unpin,
{
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message },
            ) => bytes.extend_from_slice(&message),
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) => return Err(failed("error reading exec output", e)),
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn build_host_config(spec: &ContainerSpec) -> RuntimeResult<HostConfig> {
    let dir = spec
        .bind_dir
        .to_str()
        .ok_or_else(|| failed("invalid bind directory", spec.bind_dir.display()))?;

    Ok(HostConfig {
        binds: Some(vec![format!("{dir}:{dir}")]),
        privileged: Some(spec.privileged),
        auto_remove: Some(spec.auto_remove),
        network_mode: spec.network_mode.clone(),
        ..Default::default()
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_images(&self) -> RuntimeResult<Vec<ImageInfo>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| failed("failed to list images", e))?;

        Ok(images
            .into_iter()
            .map(|img| ImageInfo {
                id: img.id,
                repo_tags: img.repo_tags,
                size: Some(img.size),
            })
            .collect())
    }

    async fn build_image(
        &self,
        request: BuildRequest,
        progress: BuildProgress<'_>,
    ) -> RuntimeResult<()> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(request.context));

        while let Some(chunk) = stream.next().await {
            let info = chunk.map_err(|e| SandboxError::build_failed(e.to_string()))?;

            if let Some(error) = info.error {
                return Err(SandboxError::build_failed(error));
            }
            if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
                return Err(SandboxError::build_failed(message));
            }
            if let Some(text) = info.stream.as_deref().or(info.status.as_deref()) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    progress(trimmed);
                }
            }
        }

        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> RuntimeResult<ImageInfo> {
        let inspect = self.docker.inspect_image(reference).await.map_err(|e| {
            if matches!(
                e,
                BollardError::DockerResponseServerError {
                    status_code: 404,
                    ..
                }
            ) {
                SandboxError::image_not_found(reference)
            } else {
                failed("failed to inspect image", e)
            }
        })?;

        Ok(ImageInfo {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            size: inspect.size,
        })
    }

    async fn list_containers(&self, name: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        // Docker's name filter is a regex match, anchor it for an exact name.
        let filters = HashMap::from([("name".to_string(), vec![format!("^/{name}$")])]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| failed("failed to list containers", e))?;

        let wanted = format!("/{name}");
        Ok(containers
            .into_iter()
            .filter(|c| {
                c.names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| *n == wanted))
            })
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: name.to_string(),
                image: c.image.unwrap_or_default(),
                state: ContainerState::from_docker(c.state.as_deref()),
                created: c.created,
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let dir = spec.bind_dir.display().to_string();
        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            tty: Some(spec.tty),
            working_dir: Some(dir),
            host_config: Some(build_host_config(spec)?),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| failed("failed to create container", e))?;

        for warning in &response.warnings {
            warn!("Docker warning while creating {}: {}", spec.name, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| failed("failed to start container", e))
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) || is_gone(&e) => {
                debug!("Container {} already stopped: {}", id, e);
                Ok(())
            }
            Err(e) => Err(failed("failed to stop container", e)),
        }
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => {
                debug!("Container {} already removed: {}", id, e);
                Ok(())
            }
            Err(e) => Err(failed("failed to remove container", e)),
        }
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<String> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| failed("failed to create exec", e))?;

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| failed("failed to start exec", e))?
        {
            StartExecResults::Attached { output, .. } => collect_output(output).await,
            StartExecResults::Detached => Ok(String::new()),
        }
    }
}
