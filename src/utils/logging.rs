use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::{Path, PathBuf};
use std::fs;

/// Log file used when none is given, truncated at every run
pub const DEFAULT_LOG_FILE: &str = "scraping.log";

/// Filter for the grader's own logs; `RUST_LOG` directives still apply
pub fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("availability_grader={}", level).parse()?)
        .add_directive("warn".parse()?);

    Ok(filter)
}

/// Initialize the logging system: stdout plus a plain-text log file
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let log_file = log_file.unwrap_or_else(default_log_file);

    // Configure the logging format
    let stdout_layer = fmt::layer()
        .with_target(false);

    // Create parent directory if necessary
    if let Some(parent) = log_file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create log directory: {}", parent.display()))?;
    }

    let file = fs::File::create(&log_file)
        .context(format!("Failed to create log file: {}", log_file.display()))?;
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file);

    tracing_subscriber::registry()
        .with(env_filter(verbose)?)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// `scraping.log` in the working directory
pub fn default_log_file() -> PathBuf {
    Path::new(DEFAULT_LOG_FILE).to_path_buf()
}
