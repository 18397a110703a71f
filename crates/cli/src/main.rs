//! Ponder CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: write a default config file
//! - `chat`: interactive chat or single-message mode
//! - `gateway`: start the HTTP streaming server

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ponder",
    about = "Ponder: a streaming research agent with visible reasoning",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Do not print the model's reasoning
        #[arg(long)]
        hide_reasoning: bool,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            session,
            hide_reasoning,
        } => commands::chat::run(message, session, hide_reasoning).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
    }

    Ok(())
}
