use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::crawler::task::Availability;
use crate::utils::events::{EventSink, GradeEvent};

/// Run metrics collector, fed by pipeline events
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    pub tasks_total: usize,

    pub chunks_started: usize,

    /// Navigation attempts, retries included
    pub attempts: usize,

    pub retries: usize,

    pub in_stock: usize,
    pub out_of_stock: usize,
    pub unknown: usize,

    /// Terminal failures keyed by reason
    pub failures: HashMap<String, usize>,

    /// Challenges seen, resolved and left unresolved, keyed by kind
    pub challenges_detected: HashMap<String, usize>,
    pub challenges_resolved: HashMap<String, usize>,
    pub challenges_unresolved: HashMap<String, usize>,

    pub environment_failed: bool,
}

impl Metrics {
    pub fn resolved(&self) -> usize {
        self.in_stock + self.out_of_stock + self.unknown
    }

    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Get all metrics
    pub fn get_metrics(&self) -> Metrics {
        match self.metrics.lock() {
            Ok(metrics) => metrics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Log a one-line summary of the run
    pub fn log_summary(&self) {
        let metrics = self.get_metrics();
        let elapsed = (Utc::now() - metrics.start_time).num_seconds();
        let detected: usize = metrics.challenges_detected.values().sum();
        let resolved: usize = metrics.challenges_resolved.values().sum();

        info!(
            tasks = metrics.tasks_total,
            in_stock = metrics.in_stock,
            out_of_stock = metrics.out_of_stock,
            unknown = metrics.unknown,
            failed = metrics.failed(),
            retries = metrics.retries,
            challenges = detected,
            challenges_resolved = resolved,
            elapsed_secs = elapsed,
            "Run summary"
        );

        for (reason, count) in &metrics.failures {
            info!(%reason, count, "Failures by reason");
        }
    }
}

impl EventSink for MetricsCollector {
    fn emit(&self, event: &GradeEvent) {
        let mut metrics = match self.metrics.lock() {
            Ok(metrics) => metrics,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            GradeEvent::BatchStarted { tasks, .. } => metrics.tasks_total += tasks,
            GradeEvent::ChunkStarted { .. } => metrics.chunks_started += 1,
            GradeEvent::TaskStarted { .. } => metrics.attempts += 1,
            GradeEvent::TaskRetried { .. } => metrics.retries += 1,
            GradeEvent::TaskResolved { availability, .. } => match availability {
                Availability::InStock => metrics.in_stock += 1,
                Availability::OutOfStock => metrics.out_of_stock += 1,
                Availability::Unknown => metrics.unknown += 1,
            },
            GradeEvent::TaskFailed { reason, .. } => {
                *metrics.failures.entry(reason.to_string()).or_default() += 1;
            }
            GradeEvent::ChallengeDetected { kind, .. } => {
                *metrics.challenges_detected.entry(kind.to_string()).or_default() += 1;
            }
            GradeEvent::ChallengeResolved { kind, .. } => {
                *metrics.challenges_resolved.entry(kind.to_string()).or_default() += 1;
            }
            GradeEvent::ChallengeUnresolved { kind, .. } => {
                *metrics.challenges_unresolved.entry(kind.to_string()).or_default() += 1;
            }
            GradeEvent::EnvironmentFailed { .. } => metrics.environment_failed = true,
            GradeEvent::ChunkPaused { .. } => {}
        }
    }
}
