use crate::runtime;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sortie-agent",
    about = "Mission telemetry relay for the Sortie game client",
    long_about = "sortie-agent tails the game client's log, assembles per-mission \
player data records, and relays them to the Sortie data service.",
    version,
    term_width = 100,
    after_help = "\
EXAMPLES:
    sortie-agent run --config /etc/sortie/sortie-agent.toml
    sortie-agent validate --config ./config/sortie-agent.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the client log and relay mission records
    Run {
        #[arg(short, long, default_value = "config/sortie-agent.toml")]
        config: PathBuf,
    },

    /// Parse the configuration file and print it without running
    Validate {
        #[arg(short, long, default_value = "config/sortie-agent.toml")]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

/// Entry function for the CLI.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => runtime::runtime::run_agent(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Validate the configuration file.
fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config);
    let cfg = crate::helpers::load_config::Config::load(&config)?;
    println!("Configuration valid:\n{:#?}", cfg);
    Ok(())
}

/// Show version information.
fn show_version() {
    println!("sortie-agent {}", env!("CARGO_PKG_VERSION"));
}
