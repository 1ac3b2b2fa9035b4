//! Progress and error events emitted by the pipeline.
//!
//! The core never formats logs itself; it hands [`GradeEvent`]s to an
//! [`EventSink`] and lets the sink decide what to do with them.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::challenge::detect::ChallengeState;
use crate::crawler::task::{Availability, FailureReason};

#[derive(Debug, Clone, PartialEq)]
pub enum GradeEvent {
    BatchStarted { tasks: usize, chunks: usize },
    ChunkStarted { chunk: usize, chunks: usize, tasks: usize },
    ChunkPaused { chunk: usize, pause: Duration },
    TaskStarted { id: String, attempt: u32, max_attempts: u32 },
    TaskRetried { id: String, attempt: u32, reason: FailureReason, delay: Duration },
    TaskResolved {
        id: String,
        availability: Availability,
        average_rating: Option<f64>,
        review_count: Option<u64>,
    },
    TaskFailed { id: String, reason: FailureReason, attempts: u32 },
    ChallengeDetected { id: String, kind: ChallengeState },
    ChallengeResolved { id: String, kind: ChallengeState },
    ChallengeUnresolved { id: String, kind: ChallengeState },
    EnvironmentFailed { error: String },
}

/// Receiver for pipeline events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GradeEvent);
}

/// Writes every event as a structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &GradeEvent) {
        match event {
            GradeEvent::BatchStarted { tasks, chunks } => {
                info!(tasks, chunks, "Batch split into chunks");
            }
            GradeEvent::ChunkStarted { chunk, chunks, tasks } => {
                info!(chunk, chunks, tasks, "Processing chunk {}/{}", chunk, chunks);
            }
            GradeEvent::ChunkPaused { chunk, pause } => {
                info!(chunk, "Pausing {:.1}s before the next chunk", pause.as_secs_f64());
            }
            GradeEvent::TaskStarted { id, attempt, max_attempts } => {
                debug!(%id, "Navigating (attempt {}/{})", attempt + 1, max_attempts);
            }
            GradeEvent::TaskRetried { id, attempt, reason, delay } => {
                warn!(%id, attempt, %reason, "Attempt failed, retrying in {} ms", delay.as_millis());
            }
            GradeEvent::TaskResolved { id, availability, average_rating, review_count } => {
                info!(%id, %availability, ?average_rating, ?review_count, "Product graded");
            }
            GradeEvent::TaskFailed { id, reason, attempts } => {
                error!(%id, %reason, attempts, "Product could not be graded");
            }
            GradeEvent::ChallengeDetected { id, kind } => {
                info!(%id, %kind, "Challenge detected");
            }
            GradeEvent::ChallengeResolved { id, kind } => {
                info!(%id, %kind, "Challenge resolved");
            }
            GradeEvent::ChallengeUnresolved { id, kind } => {
                warn!(%id, %kind, "Challenge unresolved");
            }
            GradeEvent::EnvironmentFailed { error } => {
                error!(%error, "Browser environment failed, aborting remaining tasks");
            }
        }
    }
}

/// Forwards each event to several sinks
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for SinkSet {
    fn emit(&self, event: &GradeEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
