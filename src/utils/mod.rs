pub mod events;
pub mod logging;
pub mod metrics;
pub mod pacing;

// Re-export common functions and types
pub use events::{EventSink, GradeEvent, SinkSet, TracingSink};
pub use logging::{init_logging, default_log_file};
pub use metrics::{MetricsCollector, Metrics};
