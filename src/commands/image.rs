//! Sandbox image management commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::sandbox::ImageInfo;

use super::{load_project, open_sandbox};

/// Image management actions.
#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Build the sandbox image from the configured Dockerfile
    Build,

    /// Show image status and information
    Status,
}

/// Run image management command.
pub async fn run(action: ImageAction) -> Result<()> {
    let (project_dir, config) = load_project()?;
    let sandbox = open_sandbox(&config, &project_dir).await?;
    let images = sandbox.images();

    match action {
        ImageAction::Build => {
            images.build_image().await.map_err(|e| {
                let hint = if e.is_build_failed() {
                    format!(
                        "Failed to build sandbox image from {}",
                        images.sandbox_dockerfile().display()
                    )
                } else {
                    "Failed to build sandbox image".to_string()
                };
                anyhow::Error::new(e).context(hint)
            })?;
            println!(
                "{} Built {} from {}",
                "✓".green(),
                sandbox.identity().image.cyan(),
                images.sandbox_dockerfile().display()
            );
        }
        ImageAction::Status => {
            let matching = images.matching_images().await?;
            print!("{}", format_image_status(&sandbox.identity().image, &matching));
        }
    }

    Ok(())
}

/// Human-readable size in MB, or GB once past a gigabyte.
fn format_size(bytes: i64) -> String {
    // Precision loss is acceptable for display purposes
    #[allow(clippy::cast_precision_loss)]
    let size = bytes.unsigned_abs() as f64;
    let size_megabytes = size / 1_048_576.0;
    let size_gigabytes = size_megabytes / 1024.0;
    if size_gigabytes >= 1.0 {
        format!("{size_gigabytes:.2} GB ({size_megabytes:.2} MB)")
    } else {
        format!("{size_megabytes:.2} MB")
    }
}

/// Renders the status of the sandbox image.
pub(crate) fn format_image_status(image: &str, matching: &[ImageInfo]) -> String {
    if matching.is_empty() {
        return format!(
            "Image not found: {image}\n\nTo build the image, run:\n  {}\n\nIt is also built on the first {}.\n",
            "shellbox image build".green(),
            "shellbox run".green()
        );
    }

    let mut out = format!("Image: {image}\nStatus: {}\n", "Found".green());
    for img in matching {
        if let Some(size) = img.size {
            out.push_str(&format!("Size: {}\n", format_size(size)));
        }
        if !img.repo_tags.is_empty() {
            out.push_str(&format!("Tags: {}\n", img.repo_tags.join(", ")));
        }
        out.push_str(&format!("ID: {}\n", img.id));
    }
    out
}
