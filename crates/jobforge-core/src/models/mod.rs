pub mod job;
pub mod worker;

pub use job::{Job, JobStats, JobStatus, JobType};
pub use worker::{Worker, WorkerStats, WorkerStatus};
