use serde::{Serialize, Deserialize};
use std::fmt;

/// One product page to grade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Position of the originating row in the input sequence
    pub index: usize,

    /// Product identifier (ASIN)
    pub id: String,

    /// Product page to visit
    pub target_url: String,

    /// Failed attempts consumed so far
    pub attempt: u32,

    /// Ceiling on navigation attempts
    pub max_attempts: u32,
}

impl Task {
    pub fn new(index: usize, id: impl Into<String>, target_url: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            index,
            id: id.into(),
            target_url: target_url.into(),
            attempt: 0,
            max_attempts,
        }
    }

    /// True once the attempt budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Stock state of a product page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Availability {
    InStock,
    OutOfStock,
    Unknown,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Why a task ended without a usable extraction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Navigation kept timing out or failing at the network level
    NavigationTimeout,

    /// A challenge page could not be cleared
    ChallengeUnresolved,

    /// The page loaded but none of the known product landmarks matched
    UnrecognizedLayout,

    /// The browsing engine could not be started or crashed
    EnvironmentUnavailable,

    /// The target answered with a "page not found" page
    PageNotFound,

    /// The worker running the task panicked
    WorkerPanicked,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NavigationTimeout => "navigation_timeout",
            FailureReason::ChallengeUnresolved => "challenge_unresolved",
            FailureReason::UnrecognizedLayout => "unrecognized_layout",
            FailureReason::EnvironmentUnavailable => "environment_unavailable",
            FailureReason::PageNotFound => "page_not_found",
            FailureReason::WorkerPanicked => "worker_panicked",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task, created once and never mutated afterwards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Input row this result belongs to
    pub index: usize,

    /// Product identifier
    pub id: String,

    pub availability: Availability,

    /// Raw text of the availability block, when one was found
    pub availability_text: Option<String>,

    /// Average star rating in `0.0..=5.0`
    pub average_rating: Option<f64>,

    pub review_count: Option<u64>,

    /// Set when the task failed terminally or the page was missing
    pub failure_reason: Option<FailureReason>,

    /// Failed attempts consumed before the task ended
    pub attempts: u32,
}

impl TaskResult {
    /// A terminal failure for `task`
    pub fn failed(task: &Task, reason: FailureReason) -> Self {
        Self {
            index: task.index,
            id: task.id.clone(),
            availability: Availability::Unknown,
            availability_text: None,
            average_rating: None,
            review_count: None,
            failure_reason: Some(reason),
            attempts: task.attempt,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_some()
    }
}
