mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Build layered Python service images and launch them"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter strata.toml
    Init,
    /// Build the image, reusing every layer whose inputs are unchanged
    Build,
    /// Serve the built image
    Launch,
    /// Build, then serve
    Up,
    /// Show the current image and its layers
    Status,
    /// Remove layers the current image does not use
    Prune,
    /// Write an equivalent Dockerfile to the project root
    Eject,
    /// Check the interpreter, manifest, application module and port
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Build => commands::build().await?,
        Commands::Launch => commands::launch().await?,
        Commands::Up => commands::up().await?,
        Commands::Status => commands::status().await?,
        Commands::Prune => commands::prune().await?,
        Commands::Eject => commands::eject().await?,
        Commands::Doctor => commands::doctor().await?,
    }

    Ok(())
}
