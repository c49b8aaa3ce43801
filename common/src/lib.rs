pub mod error;
pub mod job;
pub mod payload;
pub mod record;
pub mod results;
pub mod task;
pub mod worker;

pub use error::{FarmError, Result};
pub use job::{JobId, JobInfo, JobRequest, JobStatus};
pub use payload::{PayloadKind, RenderPayload, Resolution, TaskPayload};
pub use record::{Record, Serializable, TaskRecord};
pub use results::{JobResults, ResultSink};
pub use task::{NodeId, Task, TaskAssignment, TaskId, TaskStatus, TaskView};
pub use worker::{
    ClaimRequest, ClaimResponse, ErrorResponse, NodeMetrics, NodeRegisterRequest,
    NodeRegisterResponse, SubmitOutcome, SubmitResultQuery, SubmitResultResponse,
    TaskAssignmentRequest, TaskAssignmentResponse,
};
