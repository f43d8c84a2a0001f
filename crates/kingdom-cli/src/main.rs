use clap::{Parser, Subcommand};
use kingdom_core::KingdomConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "kingdom", version, about = "Kingdom session tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the metadata cache key for an action invocation.
    Key {
        /// Action id, e.g. "build"
        action: String,

        /// Action parameters as a JSON object, e.g. '{"landId":"L1"}'
        #[arg(long)]
        params: Option<String>,
    },

    /// Replay a YAML/JSON scenario against the in-memory engine.
    ///
    /// Every listener notification and step result is printed to stdout as
    /// one JSON line.
    Replay {
        /// Path to the scenario file
        script: PathBuf,

        /// Path to kingdom.yaml. Defaults apply when omitted.
        #[arg(long, env = "KINGDOM_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Key { action, params } => {
            init_tracing(&KingdomConfig::default().logging.level);
            commands::key::run(&action, params.as_deref())?;
        }

        Command::Replay { script, config } => {
            let config = match config {
                Some(path) => KingdomConfig::from_file(&path)?,
                None => KingdomConfig::default(),
            };
            init_tracing(&config.logging.level);
            commands::replay::run(&script, &config).await?;
        }
    }

    Ok(())
}
