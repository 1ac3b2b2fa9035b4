pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logs for the grader
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log file, written alongside stdout
    #[arg(long, global = true, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade every product page listed in a CSV file
    Run {
        /// Input CSV with a "Details Page Link" column
        #[arg(short, long, env = "INPUT_FILE")]
        input: PathBuf,

        /// Output CSV, defaults to <input>_graded.csv
        #[arg(short, long, env = "OUTPUT_FILE")]
        output: Option<PathBuf>,

        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Grade a repeatable random sample of N rows (0 grades everything)
        #[arg(short, long, env = "SAMPLE_SIZE")]
        sample: Option<usize>,

        /// Maximum pages open at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Maximum rows per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { input, output, profile, sample, concurrency, chunk_size } => {
            info!("Grading {} with profile {}", input.display(), profile);
            let options = commands::RunOptions {
                output: output.unwrap_or_else(|| commands::default_output(&input)),
                input,
                profile,
                sample: sample.filter(|size| *size > 0),
                concurrency,
                chunk_size,
            };
            commands::run(options).await
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}
