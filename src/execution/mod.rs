//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod job;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{StepExecutor, StepOutcome};
pub use job::{Job, JobSpec, JobStatus, PollState, ResourceRequest};
pub use scheduler::{
    get_index_list, parse_ncores, partition, JobProgress, JobProgressFn, JobScheduler,
    SchedulerConfig, SchedulerReport,
};
