pub mod config;
pub mod error;
pub mod operation;
pub mod paths;
pub mod render;
pub mod step;
pub mod task;

pub use config::{PipelineConfig, PollSettings, ResourcePolicy};
pub use error::FunnelError;
pub use operation::{
    finalize, JobResult, JobStatus, Operation, OperationError, OutputMap, OutputRecord,
    ResolvedOutputs,
};
pub use paths::{LocationEntry, LocationMap};
pub use render::{OutputGlob, RenderedJob};
pub use step::{
    InputBinding, InputParameter, InputType, JobOrder, JobValue, OutputBinding, OutputParameter,
    PathClass, PathValue, StepSpec,
};
pub use task::{build_task, TaskRequest, TaskSpec};
