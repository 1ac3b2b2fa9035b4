use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::cli::config::RunConfig;
use crate::crawler::executor::EnvironmentError;
use crate::crawler::task::{FailureReason, Task, TaskResult};
use crate::utils::pacing::pause;

/// Something that takes a task to its result
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: Task) -> Result<TaskResult, EnvironmentError>;
}

/// Results of one chunk, one per task, in completion order
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub results: Vec<TaskResult>,

    /// Set when the environment failed and the chunk was cut short
    pub fatal: Option<EnvironmentError>,
}

/// Runs the tasks of a chunk with bounded concurrency and paced admission
pub struct WorkerPool {
    runner: Arc<dyn TaskRunner>,
    config: Arc<RunConfig>,
}

impl WorkerPool {
    pub fn new(runner: Arc<dyn TaskRunner>, config: Arc<RunConfig>) -> Self {
        Self { runner, config }
    }

    pub async fn run(&self, chunk: Vec<Task>) -> ChunkReport {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut workers: JoinSet<Result<TaskResult, EnvironmentError>> = JoinSet::new();
        let mut running: HashMap<Id, Task> = HashMap::new();
        let mut report = ChunkReport {
            results: Vec::with_capacity(chunk.len()),
            fatal: None,
        };

        let mut pending = chunk.into_iter();
        let mut admitted = 0usize;

        while report.fatal.is_none() {
            let Some(task) = pending.next() else { break };

            // Wait for a free slot, collecting finished workers meanwhile
            let permit = loop {
                if report.fatal.is_some() {
                    break None;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => break permit.ok(),
                    Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                        collect(joined, &mut running, &mut report);
                    }
                }
            };

            if report.fatal.is_some() {
                report.results.push(TaskResult::failed(&task, FailureReason::EnvironmentUnavailable));
                break;
            }

            let Some(permit) = permit else {
                error!("Worker pool semaphore closed unexpectedly");
                report.results.push(TaskResult::failed(&task, FailureReason::EnvironmentUnavailable));
                break;
            };

            if admitted > 0 {
                tokio::time::sleep(pause(self.config.request_delay_ms)).await;
            }
            admitted += 1;

            debug!(id = %task.id, index = task.index, "Admitting task");
            let runner = self.runner.clone();
            let handle = workers.spawn({
                let task = task.clone();
                async move {
                    let _permit = permit;
                    runner.run(task).await
                }
            });
            running.insert(handle.id(), task);
        }

        if report.fatal.is_none() {
            while let Some(joined) = workers.join_next_with_id().await {
                collect(joined, &mut running, &mut report);
                if report.fatal.is_some() {
                    workers.abort_all();
                }
            }
        } else {
            workers.abort_all();
            while let Some(joined) = workers.join_next_with_id().await {
                collect(joined, &mut running, &mut report);
            }
        }

        // Tasks never admitted after an environment failure
        for task in pending {
            report.results.push(TaskResult::failed(&task, FailureReason::EnvironmentUnavailable));
        }

        report
    }
}

fn collect(
    joined: Result<(Id, Result<TaskResult, EnvironmentError>), JoinError>,
    running: &mut HashMap<Id, Task>,
    report: &mut ChunkReport,
) {
    match joined {
        Ok((id, Ok(result))) => {
            running.remove(&id);
            report.results.push(result);
        }
        Ok((id, Err(e))) => {
            if let Some(task) = running.remove(&id) {
                report.results.push(TaskResult::failed(&task, FailureReason::EnvironmentUnavailable));
            }
            if report.fatal.is_none() {
                error!("Environment failure, stopping chunk: {}", e);
                report.fatal = Some(e);
            }
        }
        Err(e) => {
            let Some(task) = running.remove(&e.id()) else {
                warn!("Finished worker {} is not tracked", e.id());
                return;
            };

            let reason = if e.is_panic() {
                error!(id = %task.id, "Worker panicked: {}", e);
                FailureReason::WorkerPanicked
            } else {
                FailureReason::EnvironmentUnavailable
            };
            report.results.push(TaskResult::failed(&task, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{instant_config, FakeEngine, Visit};
    use crate::challenge::detect::pages;
    use crate::challenge::mitigator::ChallengeMitigator;
    use crate::challenge::ocr::MockOcrSolver;
    use crate::crawler::executor::TaskExecutor;
    use crate::crawler::task::Availability;
    use crate::utils::events::recording::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tasks(count: usize) -> Vec<Task> {
        (0..count)
            .map(|i| Task::new(i, format!("B{:09}", i), format!("https://www.amazon.fr/dp/B{:09}", i), 3))
            .collect()
    }

    fn ok(task: &Task) -> TaskResult {
        TaskResult {
            index: task.index,
            id: task.id.clone(),
            availability: Availability::InStock,
            availability_text: None,
            average_rating: None,
            review_count: None,
            failure_reason: None,
            attempts: 0,
        }
    }

    fn run_config(max_concurrency: usize) -> Arc<RunConfig> {
        let mut config = instant_config().run;
        config.max_concurrency = max_concurrency;
        Arc::new(config)
    }

    /// Sleeps a little per task and records how many ran at once
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskRunner for Gauge {
        async fn run(&self, task: Task) -> Result<TaskResult, EnvironmentError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ok(&task))
        }
    }

    /// Records when each task started running
    #[derive(Default)]
    struct Admissions {
        started: std::sync::Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl TaskRunner for Admissions {
        async fn run(&self, task: Task) -> Result<TaskResult, EnvironmentError> {
            self.started.lock().unwrap().push(tokio::time::Instant::now());
            Ok(ok(&task))
        }
    }

    struct Scripted;

    #[async_trait]
    impl TaskRunner for Scripted {
        async fn run(&self, task: Task) -> Result<TaskResult, EnvironmentError> {
            match task.index {
                2 => panic!("parser blew up"),
                5 => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err(EnvironmentError::Lost("chrome crashed".to_string()))
                }
                i if i > 5 => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ok(&task))
                }
                _ => Ok(ok(&task)),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_holds() {
        for ceiling in [1, 3, 8] {
            let gauge = Arc::new(Gauge::default());
            let pool = WorkerPool::new(gauge.clone(), run_config(ceiling));

            let report = pool.run(tasks(20)).await;
            assert_eq!(report.results.len(), 20);
            assert!(report.fatal.is_none());
            assert!(gauge.peak.load(Ordering::SeqCst) <= ceiling);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_are_paced() {
        let admissions = Arc::new(Admissions::default());
        let mut config = instant_config().run;
        config.max_concurrency = 4;
        config.request_delay_ms = (100, 100);
        let pool = WorkerPool::new(admissions.clone(), Arc::new(config));

        let begin = tokio::time::Instant::now();
        let report = pool.run(tasks(4)).await;
        assert_eq!(report.results.len(), 4);
        assert!(begin.elapsed() >= Duration::from_millis(300));

        let started = admissions.started.lock().unwrap().clone();
        assert_eq!(started.len(), 4);
        assert_eq!(started[0], begin);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_contexts_never_exceed_ceiling() {
        let mut pages_by_url = FakeEngine::new().hold(Duration::from_millis(15));
        let chunk = tasks(12);
        for task in &chunk {
            pages_by_url = pages_by_url.route(&task.target_url, vec![Visit::page(pages::IN_STOCK)]);
        }
        let engine = pages_by_url;

        let config = instant_config();
        let events = Arc::new(RecordingSink::default());
        let mitigator = ChallengeMitigator::new(config.challenge.clone(), Arc::new(MockOcrSolver::new()), events.clone());
        let run = run_config(4);
        let executor = TaskExecutor::new(Arc::new(engine.clone()), Arc::new(mitigator), run.clone(), events);

        let report = WorkerPool::new(Arc::new(executor), run).run(chunk).await;
        assert_eq!(report.results.len(), 12);
        assert!(report.results.iter().all(|r| r.availability == Availability::InStock));
        assert!(engine.peak() <= 4);
        assert_eq!(engine.active(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_leaves_siblings_alone() {
        let chunk = tasks(4);
        let mut engine = FakeEngine::new();
        for task in &chunk {
            let page = if task.index == 1 { pages::UNKNOWN_BLOCK } else { pages::IN_STOCK };
            engine = engine.route(&task.target_url, vec![Visit::page(page)]);
        }

        let config = instant_config();
        let events = Arc::new(RecordingSink::default());
        let mitigator = ChallengeMitigator::new(config.challenge.clone(), Arc::new(MockOcrSolver::new()), events.clone());
        let run = run_config(4);
        let executor = TaskExecutor::new(Arc::new(engine.clone()), Arc::new(mitigator), run.clone(), events);

        let mut results = WorkerPool::new(Arc::new(executor), run).run(chunk).await.results;
        results.sort_by_key(|r| r.index);

        assert_eq!(results[1].failure_reason, Some(FailureReason::ChallengeUnresolved));
        assert_eq!(results[1].attempts, 3);
        for i in [0, 2, 3] {
            assert_eq!(results[i].availability, Availability::InStock);
            assert_eq!(results[i].attempts, 0);
            assert_eq!(results[i].failure_reason, None);
        }
    }

    #[tokio::test]
    async fn test_panic_and_environment_failure() {
        let pool = WorkerPool::new(Arc::new(Scripted), run_config(3));

        let mut report = pool.run(tasks(9)).await;
        report.results.sort_by_key(|r| r.index);

        assert_eq!(report.fatal, Some(EnvironmentError::Lost("chrome crashed".to_string())));
        assert_eq!(report.results.len(), 9);
        assert_eq!(
            report.results.iter().map(|r| r.index).collect::<Vec<_>>(),
            (0..9).collect::<Vec<_>>()
        );
        assert_eq!(report.results[2].failure_reason, Some(FailureReason::WorkerPanicked));
        assert_eq!(report.results[5].failure_reason, Some(FailureReason::EnvironmentUnavailable));
        for result in &report.results[6..] {
            assert_eq!(result.failure_reason, Some(FailureReason::EnvironmentUnavailable));
        }
        for i in [0, 1, 3, 4] {
            assert_eq!(report.results[i].failure_reason, None);
        }
    }
}
