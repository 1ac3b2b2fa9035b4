use anyhow::{Result, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::engine::BrowsingEngine;
use crate::browser::session::WebDriverEngine;
use crate::challenge::mitigator::ChallengeMitigator;
use crate::challenge::ocr::RemoteOcrService;
use crate::cli::config::GraderConfig;
use crate::crawler::controller::BatchOrchestrator;
use crate::crawler::executor::TaskExecutor;
use crate::crawler::scheduler::Scheduler;
use crate::storage::{write_results, InputTable};
use crate::utils::events::{EventSink, SinkSet, TracingSink};
use crate::utils::metrics::MetricsCollector;

/// Options of the `run` command after defaults are applied
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: String,
    pub sample: Option<usize>,
    pub concurrency: Option<usize>,
    pub chunk_size: Option<usize>,
}

/// `<dir>/<stem>_graded.csv` next to the input
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("products");
    input.with_file_name(format!("{}_graded.csv", stem))
}

/// Load the profile and apply command line overrides
pub fn resolve_config(options: &RunOptions) -> Result<GraderConfig> {
    let mut config = GraderConfig::load_profile(&options.profile)
        .context(format!("Failed to load profile: {}", options.profile))?;

    if let Some(concurrency) = options.concurrency {
        config.run.max_concurrency = concurrency;
    }
    if let Some(chunk_size) = options.chunk_size {
        config.run.chunk_size = chunk_size;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Grade every row of the input file and write the output file
pub async fn run(options: RunOptions) -> Result<()> {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);

    async move {
        let config = resolve_config(&options)?;

        let mut table = InputTable::read(&options.input)?;
        if let Some(size) = options.sample {
            table = table.sample(size);
        }

        if table.is_empty() {
            warn!("No rows to grade in {}", options.input.display());
            return write_results(&options.output, &table, &[]);
        }

        let metrics = MetricsCollector::new();
        let events: Arc<dyn EventSink> = Arc::new(
            SinkSet::new()
                .with(Arc::new(TracingSink))
                .with(Arc::new(metrics.clone())),
        );

        let run_config = Arc::new(config.run.clone());
        let engine: Arc<dyn BrowsingEngine> = Arc::new(WebDriverEngine::new(config.browser.clone())?);
        let ocr = Arc::new(RemoteOcrService::new(&config.ocr)?);
        let mitigator = Arc::new(ChallengeMitigator::new(config.challenge.clone(), ocr, events.clone()));
        let executor = Arc::new(TaskExecutor::new(engine.clone(), mitigator, run_config.clone(), events.clone()));

        let tasks = Scheduler::new(&run_config).build_tasks(&table.targets());
        info!(
            rows = tasks.len(),
            concurrency = run_config.max_concurrency,
            chunk_size = run_config.chunk_size,
            "Starting run"
        );

        let outcome = BatchOrchestrator::new(engine, executor, run_config, events)
            .run(tasks)
            .await;

        write_results(&options.output, &table, &outcome.results)?;
        metrics.log_summary();
        info!("Results saved to {}", options.output.display());

        if let Some(fatal) = outcome.fatal {
            return Err(anyhow::Error::new(fatal)
                .context("Run aborted; unfinished rows are marked environment_unavailable"));
        }

        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = GraderConfig::list_profiles()?;

    println!("Available configuration profiles:");
    println!("  - default");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub fn manage_profile(profile_name: String) -> Result<()> {
    // Load the profile if it exists
    match GraderConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            // Profile doesn't exist, create a new one
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = GraderConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = GraderConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
