use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::browser::engine::{BrowserError, BrowsingContext, BrowsingEngine, Page};
use crate::challenge::mitigator::{ChallengeMitigator, MitigationOutcome};
use crate::cli::config::RunConfig;
use crate::crawler::pool::TaskRunner;
use crate::crawler::state::{self, RetryPolicy, StepOutcome, TaskState};
use crate::crawler::task::{Availability, FailureReason, Task, TaskResult};
use crate::extract::parse::{parse_product, Extraction};
use crate::utils::events::{EventSink, GradeEvent};

/// The browsing engine is gone; nothing else in the batch can run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("browser engine could not be started: {0}")]
    Launch(String),

    #[error("browser engine stopped responding: {0}")]
    Lost(String),
}

/// Drives one task from navigation to a classified result
pub struct TaskExecutor {
    engine: Arc<dyn BrowsingEngine>,
    mitigator: Arc<ChallengeMitigator>,
    config: Arc<RunConfig>,
    policy: RetryPolicy,
    events: Arc<dyn EventSink>,
}

impl TaskExecutor {
    pub fn new(
        engine: Arc<dyn BrowsingEngine>,
        mitigator: Arc<ChallengeMitigator>,
        config: Arc<RunConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self { engine, mitigator, config, policy, events }
    }

    /// Run `task` to a terminal state. Only an engine failure escapes as an error.
    pub async fn execute(&self, mut task: Task) -> Result<TaskResult, EnvironmentError> {
        let mut context = None;
        let result = self.drive(&mut task, &mut context).await;
        release(&mut context).await;
        result
    }

    async fn drive(
        &self,
        task: &mut Task,
        context: &mut Option<Box<dyn BrowsingContext>>,
    ) -> Result<TaskResult, EnvironmentError> {
        let mut state = TaskState::Navigating;
        let mut extraction: Option<Extraction> = None;

        while !state.is_terminal() {
            let outcome = match state {
                TaskState::Navigating => {
                    self.events.emit(&GradeEvent::TaskStarted {
                        id: task.id.clone(),
                        attempt: task.attempt,
                        max_attempts: task.max_attempts,
                    });

                    match self.visit(task).await {
                        Ok(opened) => {
                            *context = Some(opened);
                            StepOutcome::Navigated
                        }
                        Err(e) if e.is_environmental() => return Err(self.engine_lost(&e)),
                        Err(e) => {
                            warn!(id = %task.id, "Navigation failed: {}", e);
                            StepOutcome::NavigationFailed
                        }
                    }
                }
                TaskState::Mitigating => match context.as_deref() {
                    Some(page) => match self.mitigator.mitigate(&task.id, page).await {
                        Ok(MitigationOutcome::Unresolved) => StepOutcome::ChallengeUnresolved,
                        Ok(MitigationOutcome::Resolved | MitigationOutcome::NotPresent) => StepOutcome::ChallengeCleared,
                        Err(e) => return Err(self.engine_lost(&e)),
                    },
                    None => StepOutcome::NavigationFailed,
                },
                TaskState::Extracting => match read_content(context).await {
                    Ok(html) => {
                        let parsed = parse_product(&html);
                        let outcome = classify(&parsed);
                        extraction = Some(parsed);
                        outcome
                    }
                    Err(e) if e.is_environmental() => return Err(self.engine_lost(&e)),
                    Err(e) => {
                        warn!(id = %task.id, "Could not read page content: {}", e);
                        StepOutcome::NavigationFailed
                    }
                },
                TaskState::Retrying(reason) => {
                    release(context).await;

                    let delay = self.policy.delay(task.attempt.saturating_sub(1));
                    self.events.emit(&GradeEvent::TaskRetried {
                        id: task.id.clone(),
                        attempt: task.attempt,
                        reason,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                    StepOutcome::BackoffElapsed
                }
                TaskState::Resolved | TaskState::TerminalFailure(_) => break,
            };

            let next = state::next(state, outcome, task.attempt, task.max_attempts);
            if outcome.is_retryable() {
                task.attempt += 1;
            }
            debug!(id = %task.id, "{:?} --{:?}--> {:?}", state, outcome, next);
            state = next;
        }

        let result = match (state, extraction) {
            (TaskState::Resolved, Some(extraction)) => resolved(task, extraction),
            (TaskState::TerminalFailure(reason), _) => TaskResult::failed(task, reason),
            (_, _) => TaskResult::failed(task, FailureReason::UnrecognizedLayout),
        };

        self.report(&result);
        Ok(result)
    }

    /// Open a fresh context and load the task's page, releasing the context on failure
    async fn visit(&self, task: &Task) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        let timeout = self.config.navigation_timeout();

        let mut context = match tokio::time::timeout(timeout, self.engine.open_context()).await {
            Ok(opened) => opened?,
            Err(_) => return Err(BrowserError::Context(format!("no context after {:?}", timeout))),
        };

        let navigated = match tokio::time::timeout(timeout, context.navigate(&task.target_url, timeout)).await {
            Ok(navigated) => navigated,
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: task.target_url.clone(),
                timeout,
            }),
        };

        match navigated {
            Ok(()) => Ok(context),
            Err(e) => {
                context.close().await;
                Err(e)
            }
        }
    }

    /// The engine is gone; the batch stops after this task
    fn engine_lost(&self, e: &BrowserError) -> EnvironmentError {
        self.events.emit(&GradeEvent::EnvironmentFailed { error: e.to_string() });
        EnvironmentError::Lost(e.to_string())
    }

    fn report(&self, result: &TaskResult) {
        let event = match result.failure_reason {
            Some(reason) => GradeEvent::TaskFailed {
                id: result.id.clone(),
                reason,
                attempts: result.attempts,
            },
            None => GradeEvent::TaskResolved {
                id: result.id.clone(),
                availability: result.availability,
                average_rating: result.average_rating,
                review_count: result.review_count,
            },
        };
        self.events.emit(&event);
    }
}

#[async_trait]
impl TaskRunner for TaskExecutor {
    async fn run(&self, task: Task) -> Result<TaskResult, EnvironmentError> {
        self.execute(task).await
    }
}

async fn read_content(context: &Option<Box<dyn BrowsingContext>>) -> Result<String, BrowserError> {
    match context {
        Some(page) => page.content().await,
        None => Err(BrowserError::Command("no page loaded".to_string())),
    }
}

async fn release(context: &mut Option<Box<dyn BrowsingContext>>) {
    if let Some(context) = context.take() {
        context.close().await;
    }
}

fn classify(extraction: &Extraction) -> StepOutcome {
    if extraction.page_missing {
        StepOutcome::PageMissing
    } else if extraction.layout_recognized {
        StepOutcome::Extracted
    } else {
        StepOutcome::LayoutUnrecognized
    }
}

fn resolved(task: &Task, extraction: Extraction) -> TaskResult {
    // The "no featured offers" block hides the buy box; ratings next to it are not reported
    let (average_rating, review_count) = match extraction.availability {
        Availability::OutOfStock => (None, None),
        _ => (extraction.average_rating, extraction.review_count),
    };

    TaskResult {
        index: task.index,
        id: task.id.clone(),
        availability: extraction.availability,
        availability_text: extraction.availability_text,
        average_rating,
        review_count,
        failure_reason: None,
        attempts: task.attempt,
    }
}
