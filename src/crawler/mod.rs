pub mod controller;
pub mod executor;
pub mod pool;
pub mod scheduler;
pub mod state;
pub mod task;

// Re-export common types
pub use controller::{BatchOrchestrator, BatchOutcome};
pub use executor::{EnvironmentError, TaskExecutor};
pub use pool::{TaskRunner, WorkerPool};
pub use scheduler::{Scheduler, Target};
pub use task::{Availability, FailureReason, Task, TaskResult};
