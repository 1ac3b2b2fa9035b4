use std::sync::Arc;
use tracing::{error, info};

use crate::browser::engine::BrowsingEngine;
use crate::cli::config::RunConfig;
use crate::crawler::executor::EnvironmentError;
use crate::crawler::pool::{TaskRunner, WorkerPool};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::task::{Availability, FailureReason, Task, TaskResult};
use crate::utils::events::{EventSink, GradeEvent};
use crate::utils::pacing::pause;

/// Everything a batch produced
#[derive(Debug)]
pub struct BatchOutcome {
    /// One result per input task, in input order
    pub results: Vec<TaskResult>,

    /// The environment failure that cut the run short, if any
    pub fatal: Option<EnvironmentError>,
}

/// Runs a whole batch chunk by chunk
pub struct BatchOrchestrator {
    engine: Arc<dyn BrowsingEngine>,
    runner: Arc<dyn TaskRunner>,
    config: Arc<RunConfig>,
    events: Arc<dyn EventSink>,
}

impl BatchOrchestrator {
    pub fn new(
        engine: Arc<dyn BrowsingEngine>,
        runner: Arc<dyn TaskRunner>,
        config: Arc<RunConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { engine, runner, config, events }
    }

    pub async fn run(&self, tasks: Vec<Task>) -> BatchOutcome {
        let total = tasks.len();
        let scheduler = Scheduler::new(&self.config);
        let mut slots: Vec<Option<TaskResult>> = vec![None; total];

        if let Err(e) = self.engine.launch().await {
            let fatal = EnvironmentError::Launch(e.to_string());
            self.events.emit(&GradeEvent::EnvironmentFailed { error: fatal.to_string() });
            let results = tasks.iter()
                .map(|task| TaskResult::failed(task, FailureReason::EnvironmentUnavailable))
                .collect();
            return BatchOutcome { results, fatal: Some(fatal) };
        }

        let chunks = scheduler.chunks(tasks);
        let chunk_count = chunks.len();
        self.events.emit(&GradeEvent::BatchStarted { tasks: total, chunks: chunk_count });

        let pool = WorkerPool::new(self.runner.clone(), self.config.clone());
        let mut fatal = None;
        let mut chunks = chunks.into_iter().enumerate();

        while let Some((number, chunk)) = chunks.next() {
            self.events.emit(&GradeEvent::ChunkStarted {
                chunk: number + 1,
                chunks: chunk_count,
                tasks: chunk.len(),
            });

            let report = pool.run(chunk).await;
            for result in report.results {
                place(&mut slots, result);
            }

            if let Some(e) = report.fatal {
                error!("Stopping batch after chunk {}/{}: {}", number + 1, chunk_count, e);
                fatal = Some(e);
                break;
            }

            if number + 1 < chunk_count {
                let delay = pause(self.config.chunk_delay_ms);
                self.events.emit(&GradeEvent::ChunkPaused { chunk: number + 1, pause: delay });
                tokio::time::sleep(delay).await;
            }
        }

        // Chunks never started after a fatal failure
        for (_, chunk) in chunks {
            for task in &chunk {
                place(&mut slots, TaskResult::failed(task, FailureReason::EnvironmentUnavailable));
            }
        }

        let results: Vec<TaskResult> = slots.into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| {
                error!(index, "No result recorded for task, marking it failed");
                missing(index)
            }))
            .collect();

        info!("Batch finished: {} results", results.len());
        BatchOutcome { results, fatal }
    }
}

fn place(slots: &mut [Option<TaskResult>], result: TaskResult) {
    match slots.get_mut(result.index) {
        Some(slot) => *slot = Some(result),
        None => error!(index = result.index, id = %result.id, "Result index outside the batch"),
    }
}

fn missing(index: usize) -> TaskResult {
    TaskResult {
        index,
        id: String::new(),
        availability: Availability::Unknown,
        availability_text: None,
        average_rating: None,
        review_count: None,
        failure_reason: Some(FailureReason::EnvironmentUnavailable),
        attempts: 0,
    }
}
