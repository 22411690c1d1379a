//! seq-llm - Supervise local inference servers and stream chat replies.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seq_llm::commands::{self, CommandError, GlobalOptions};
use seq_llm::config::{Config, ConfigLoader};
use seq_llm::display;

#[derive(Parser)]
#[command(
    name = "seq-llm",
    about = "Run local llama.cpp servers one at a time and chat with them",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Leave unrecognized processes on a profile's port running instead of failing.
    #[arg(long, global = true)]
    permissive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a profile's server and keep it running until Ctrl-C.
    Serve {
        /// Profile key; defaults to `default_profile`.
        profile: Option<String>,
    },
    /// Start a profile's server, send one prompt, print the reply, stop.
    Chat {
        /// Profile key.
        profile: String,
        /// The prompt to send.
        prompt: String,
        /// Wait for the whole reply instead of streaming tokens.
        #[arg(long)]
        no_stream: bool,
    },
    /// Show what holds a port and whether a start would reclaim it.
    Ports {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
    /// Write the default config template.
    InitConfig,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<Config, CommandError> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    Ok(loader.load()?)
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    let global = GlobalOptions {
        permissive: cli.permissive,
    };

    match cli.command {
        Commands::InitConfig => {
            commands::init_config(cli.config.as_deref())?;
        }
        Commands::Ports { port } => {
            let config = load_config(cli.config)?;
            commands::ports(&config, port, global).await?;
        }
        Commands::Serve { profile } => {
            let config = load_config(cli.config)?;
            commands::serve(&config, profile.as_deref(), global).await?;
        }
        Commands::Chat {
            profile,
            prompt,
            no_stream,
        } => {
            let config = load_config(cli.config)?;
            commands::chat(&config, Some(&profile), &prompt, !no_stream, global).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_interrupt() => ExitCode::from(130),
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
