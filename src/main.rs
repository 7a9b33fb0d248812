use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod batch;
mod commands;
mod config;
mod sandbox;

#[derive(Parser)]
#[command(name = "shellbox")]
#[command(
    author,
    version,
    about = "Run shell commands in a persistent, network-restricted Docker sandbox"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands in the sandbox and print a transcript
    Run {
        /// Commands to run, in order
        commands: Vec<String>,

        /// Read a JSON array of commands from a file ("-" for stdin)
        #[arg(long, value_name = "PATH")]
        json: Option<String>,

        /// Directory to cd into before the commands run
        #[arg(short, long, env = "SHELLBOX_WORKDIR")]
        workdir: Option<String>,
    },

    /// Rebuild the image and replace the sandbox container
    Restart,

    /// Stop and remove the sandbox container
    Stop,

    /// Show the sandbox container status
    Status,

    /// Manage the sandbox image
    Image {
        #[command(subcommand)]
        action: commands::image::ImageAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("shellbox=debug")
        } else {
            EnvFilter::new("shellbox=info")
        }
    });

    // Logs go to stderr so stdout carries only the transcript
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            commands,
            json,
            workdir,
        } => {
            commands::run::run(commands, json, workdir).await?;
        }
        Commands::Restart => {
            commands::restart::run().await?;
        }
        Commands::Stop => {
            commands::stop::run().await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Image { action } => {
            commands::image::run(action).await?;
        }
    }

    Ok(())
}
