#![warn(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    dead_code
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use fleethub::config::Config;

#[derive(Parser, Debug)]
#[command(name = "fleethub")]
#[command(author = "theonlyhennygod")]
#[command(version = "0.7.0")]
#[command(about = "The telemetry and event-sequence hub agents report into.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the hub (WebSocket gateway + REST surface)
    Serve {
        /// Host to bind to; defaults to config server.host
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on; defaults to config server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the resolved config file path and create it if absent
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let mut config = Config::load_or_init()?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            fleethub::gateway::run_gateway(config).await
        }
        Commands::InitConfig => {
            println!("config written to {}", config.config_path.display());
            Ok(())
        }
    }
}
