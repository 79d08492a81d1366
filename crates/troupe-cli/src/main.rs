//! Troupe CLI - run improv scenes against a local inference server.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod http;
mod playback;
mod troupe;

#[derive(Debug, Parser)]
#[command(
    name = "troupe",
    about = "Turn-based multi-speaker spoken dialogue orchestrator",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Inference server base URL
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "TROUPE_SERVER")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an improv scene with the builtin troupe
    Scene(commands::scene::SceneArgs),
    /// List the builtin troupe and its model/voice assignments
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "troupe=info,troupe_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scene(args) => commands::scene::execute(args, &cli.server).await,
        Command::Agents => commands::agents::execute(),
    }
}
