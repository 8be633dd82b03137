//! batchfetch CLI - Command-line interface
//!
//! Downloads a batch of files with resume, pause/resume/cancel and optional
//! unzip, and manages the configuration file.

mod commands;
mod error;
mod progress;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "batchfetch")]
#[command(version = batchfetch::VERSION)]
#[command(about = "Download a batch of files with resume, pause and automatic unzip", long_about = None)]
struct Cli {
    /// Also print log records to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download files into the output directory
    Download(DownloadArgs),

    /// View or change configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", console::style("Error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Download(args) => commands::download::run(args, cli.verbose),
        Commands::Config { command } => commands::config::run(command),
    }
}
