mod client;
mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scast", about = "Control the embedded remote-display server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the scast daemon
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Start the display server, acquiring the capture grant if needed
    Start,

    /// Stop the display server
    Stop,

    /// Show the current session status
    Status,

    /// Stream status changes to stdout as JSON lines
    Watch,
}

#[derive(Subcommand)]
enum ServerAction {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { action } => match action {
            ServerAction::Start { foreground } => commands::server_start(foreground).await,
            ServerAction::Stop => commands::server_stop().await,
            ServerAction::Status => commands::server_status().await,
        },
        Commands::Start => commands::start().await,
        Commands::Stop => commands::stop().await,
        Commands::Status => commands::status().await,
        Commands::Watch => commands::watch().await,
    }
}
