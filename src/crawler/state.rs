//! Per-task state machine.
//!
//! Transitions are plain data: the current step's outcome plus the attempt
//! budget decide the next state, with no browser involved.

use rand::{thread_rng, Rng};
use std::time::Duration;

use crate::cli::config::RunConfig;
use crate::crawler::task::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Navigating,
    Mitigating,
    Extracting,
    /// Waiting out the backoff before navigating again
    Retrying(FailureReason),
    Resolved,
    TerminalFailure(FailureReason),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Resolved | TaskState::TerminalFailure(_))
    }
}

/// What the step that just ran produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Navigated,
    NavigationFailed,
    ChallengeCleared,
    ChallengeUnresolved,
    Extracted,
    PageMissing,
    LayoutUnrecognized,
    BackoffElapsed,
}

impl StepOutcome {
    /// Failure reason for outcomes that consume an attempt
    pub fn retry_reason(&self) -> Option<FailureReason> {
        match self {
            StepOutcome::NavigationFailed => Some(FailureReason::NavigationTimeout),
            StepOutcome::ChallengeUnresolved => Some(FailureReason::ChallengeUnresolved),
            StepOutcome::LayoutUnrecognized => Some(FailureReason::UnrecognizedLayout),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_reason().is_some()
    }
}

/// Next state after `outcome`, given `attempt` failures already consumed.
///
/// `max_attempts` counts navigations, so the attempt that fails with
/// `attempt + 1 == max_attempts` is the last one.
pub fn next(state: TaskState, outcome: StepOutcome, attempt: u32, max_attempts: u32) -> TaskState {
    if state.is_terminal() {
        return state;
    }

    if let Some(reason) = outcome.retry_reason() {
        return if attempt + 1 < max_attempts {
            TaskState::Retrying(reason)
        } else {
            TaskState::TerminalFailure(reason)
        };
    }

    match (state, outcome) {
        (TaskState::Navigating, StepOutcome::Navigated) => TaskState::Mitigating,
        (TaskState::Mitigating, StepOutcome::ChallengeCleared) => TaskState::Extracting,
        (TaskState::Extracting, StepOutcome::Extracted) => TaskState::Resolved,
        (TaskState::Extracting, StepOutcome::PageMissing) => TaskState::TerminalFailure(FailureReason::PageNotFound),
        (TaskState::Retrying(_), StepOutcome::BackoffElapsed) => TaskState::Navigating,
        // Outcomes that do not belong to the current step leave it unchanged
        (state, _) => state,
    }
}

/// Exponential backoff with jitter between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// `min(base * 2^attempt, cap)` without the jitter
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the next attempt, with up to `base` of random jitter added
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let jitter = if base_ms == 0 { 0 } else { thread_rng().gen_range(0..=base_ms) };
        self.ceiling(attempt) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = TaskState::Navigating;
        for outcome in [StepOutcome::Navigated, StepOutcome::ChallengeCleared, StepOutcome::Extracted] {
            state = next(state, outcome, 0, 3);
        }
        assert_eq!(state, TaskState::Resolved);
    }

    #[test]
    fn test_retryable_outcomes_respect_ceiling() {
        assert_eq!(
            next(TaskState::Navigating, StepOutcome::NavigationFailed, 0, 3),
            TaskState::Retrying(FailureReason::NavigationTimeout)
        );
        assert_eq!(
            next(TaskState::Navigating, StepOutcome::NavigationFailed, 1, 3),
            TaskState::Retrying(FailureReason::NavigationTimeout)
        );
        assert_eq!(
            next(TaskState::Navigating, StepOutcome::NavigationFailed, 2, 3),
            TaskState::TerminalFailure(FailureReason::NavigationTimeout)
        );
        assert_eq!(
            next(TaskState::Mitigating, StepOutcome::ChallengeUnresolved, 0, 1),
            TaskState::TerminalFailure(FailureReason::ChallengeUnresolved)
        );
        assert_eq!(
            next(TaskState::Extracting, StepOutcome::LayoutUnrecognized, 0, 2),
            TaskState::Retrying(FailureReason::UnrecognizedLayout)
        );
    }

    #[test]
    fn test_missing_page_is_not_retried() {
        assert_eq!(
            next(TaskState::Extracting, StepOutcome::PageMissing, 0, 3),
            TaskState::TerminalFailure(FailureReason::PageNotFound)
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let done = TaskState::Resolved;
        assert_eq!(next(done, StepOutcome::NavigationFailed, 0, 3), done);

        let failed = TaskState::TerminalFailure(FailureReason::NavigationTimeout);
        assert_eq!(next(failed, StepOutcome::BackoffElapsed, 0, 3), failed);
    }

    #[test]
    fn test_backoff_returns_to_navigation() {
        let state = TaskState::Retrying(FailureReason::ChallengeUnresolved);
        assert_eq!(next(state, StepOutcome::BackoffElapsed, 1, 3), TaskState::Navigating);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000));
        assert_eq!(policy.ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.ceiling(1), Duration::from_millis(200));
        assert_eq!(policy.ceiling(3), Duration::from_millis(800));
        assert_eq!(policy.ceiling(4), Duration::from_millis(1_000));
        assert_eq!(policy.ceiling(40), Duration::from_millis(1_000));

        for attempt in 0..5 {
            let delay = policy.delay(attempt);
            assert!(delay >= policy.ceiling(attempt));
            assert!(delay <= policy.ceiling(attempt) + Duration::from_millis(100));
        }
    }

    #[test]
    fn test_zero_policy_never_sleeps() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.delay(5), Duration::ZERO);
    }
}
