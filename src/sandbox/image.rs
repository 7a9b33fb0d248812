//! Sandbox image building and lookup.
//!
//! The base Dockerfile is never parsed: the sandbox steps are appended to its
//! text and the result is written next to it as `Dockerfile-sandbox`.

use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};

use super::error::SandboxError;
use super::runtime::{BuildRequest, ContainerRuntime, ImageInfo};

/// File name of the augmented Dockerfile, both on the host and in the build context.
pub(crate) const SANDBOX_DOCKERFILE: &str = "Dockerfile-sandbox";

/// Base Dockerfile text plus the steps the sandbox relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildSpec {
    base: String,
    steps: Vec<String>,
}

impl BuildSpec {
    pub fn new(base: impl Into<String>, history_path: &str) -> Self {
        Self {
            base: base.into(),
            steps: sandbox_steps(history_path),
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}", self.base, self.steps.join("\n"))
    }
}

/// History file, iptables and screen, with iptables pinned to the legacy backend.
fn sandbox_steps(history_path: &str) -> Vec<String> {
    vec![
        format!("RUN touch {}", shell_words::quote(history_path)),
        "RUN apt-get update && apt-get install -y iptables screen".to_string(),
        "RUN update-alternatives --set iptables /usr/sbin/iptables-legacy".to_string(),
        "RUN update-alternatives --set ip6tables /usr/sbin/ip6tables-legacy".to_string(),
    ]
}

/// Parse image name and tag from a string.
fn parse_image_tag(image: &str) -> (&str, &str) {
    // A colon before the last slash belongs to a registry port.
    let name_start = image.rfind('/').map_or(0, |pos| pos + 1);
    match image[name_start..].rfind(':') {
        Some(colon_pos) => {
            let (name, tag) = image.split_at(name_start + colon_pos);
            (name, &tag[1..])
        }
        None => (image, "latest"),
    }
}

/// Full `name:tag` reference, defaulting the tag to `latest`.
pub(crate) fn image_reference(image: &str) -> String {
    let (name, tag) = parse_image_tag(image);
    format!("{name}:{tag}")
}

/// Tar archive holding a single file under `name`.
fn single_file_context(path: &Path, name: &str) -> Result<Bytes, SandboxError> {
    let mut tar_buf = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_buf);
        tar.append_path_with_name(path, name).map_err(|e| {
            SandboxError::build_failed(format!("failed to pack {}: {e}", path.display()))
        })?;
        tar.finish()
            .map_err(|e| SandboxError::build_failed(format!("failed to finalize tarball: {e}")))?;
    }
    Ok(Bytes::from(tar_buf))
}

/// Builds the sandbox image and resolves it for the lifecycle manager.
pub(crate) struct ImageBuilder<'a> {
    runtime: &'a dyn ContainerRuntime,
    dockerfile: &'a Path,
    image: &'a str,
    history_path: &'a str,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        dockerfile: &'a Path,
        image: &'a str,
        history_path: &'a str,
    ) -> Self {
        Self {
            runtime,
            dockerfile,
            image,
            history_path,
        }
    }

    /// Where the augmented Dockerfile is written.
    pub fn sandbox_dockerfile(&self) -> PathBuf {
        self.dockerfile
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SANDBOX_DOCKERFILE)
    }

    /// Writes the augmented Dockerfile and builds the image from it.
    pub async fn build_image(&self) -> Result<(), SandboxError> {
        info!("Building sandbox image: {}", self.image);

        let base = fs::read_to_string(self.dockerfile).map_err(|e| {
            SandboxError::build_failed(format!(
                "failed to read base Dockerfile {}: {e}",
                self.dockerfile.display()
            ))
        })?;

        let spec = BuildSpec::new(base, self.history_path);
        let target = self.sandbox_dockerfile();
        fs::write(&target, spec.render()).map_err(|e| {
            SandboxError::build_failed(format!("failed to write {}: {e}", target.display()))
        })?;
        debug!("Wrote {}", target.display());

        let request = BuildRequest {
            tag: self.image.to_string(),
            dockerfile: SANDBOX_DOCKERFILE.to_string(),
            context: single_file_context(&target, SANDBOX_DOCKERFILE)?,
        };

        self.runtime
            .build_image(request, &|line: &str| info!("{}", line))
            .await?;

        info!("Image built successfully: {}", self.image);
        Ok(())
    }

    /// Local images carrying exactly this reference.
    pub async fn matching_images(&self) -> Result<Vec<ImageInfo>, SandboxError> {
        let images = self.runtime.list_images().await?;
        Ok(images
            .into_iter()
            .filter(|img| img.has_tag(self.image))
            .collect())
    }

    pub async fn image_exists(&self) -> Result<bool, SandboxError> {
        Ok(!self.matching_images().await?.is_empty())
    }

    /// Reuses the image if present, otherwise builds it, then inspects it.
    pub async fn get_or_create_image(&self) -> Result<ImageInfo, SandboxError> {
        if self.image_exists().await? {
            debug!("Reusing image {}", self.image);
        } else {
            self.build_image().await?;
        }

        self.runtime.inspect_image(self.image).await
    }
}
