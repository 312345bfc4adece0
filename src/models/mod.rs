pub mod job;

pub use job::{Detection, Job, JobResult, JobStatus, JobsPage};
