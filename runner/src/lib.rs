pub mod backend;
pub mod job;
pub mod poll;

pub use backend::{HttpBackend, PipelinesBackend};
pub use job::{JobHandle, JobRunner, PreparedJob, SubmittedJob};
pub use poll::{jittered_interval, CompletionPoller, PollOutcome, PollState};
