use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{handle_command, Command};
use config::{default_data_dir, load_config, Backend, Overrides, Settings};

#[derive(Parser)]
#[command(name = "saga")]
#[command(about = "CodeSaga learning tracker", long_about = None)]
struct Cli {
    /// Curriculum JSON file
    #[arg(long, global = true)]
    curriculum: Option<PathBuf>,
    /// Directory holding the progress store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("log_init_error: subscriber already set");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Relative config and curriculum paths resolve against the working directory.
    let root = std::env::current_dir()?;
    let settings = Settings::resolve(
        Overrides {
            curriculum: cli.curriculum,
            data_dir: cli.data_dir,
            backend: cli.backend,
        },
        |name| std::env::var(name).ok(),
        load_config(&root),
        &root,
        default_data_dir(),
    );
    tracing::debug!(?settings, "settings resolved");

    handle_command(cli.command, &settings)
}
