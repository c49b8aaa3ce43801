use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{NodeId, TaskAssignment, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegisterRequest {
    pub hostname: String,
    pub max_concurrency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegisterResponse {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentResponse {
    pub task: Option<TaskAssignment>,
}

/// Identifica un claim (tarea, nodo). Se usa para release y heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub task_id: TaskId,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub ok: bool,
}

/// Query de `POST /api/v1/tasks/:id/result`; el cuerpo son los bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultQuery {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitOutcome {
    /// Primer resultado válido: la tarea quedó completa.
    Accepted,
    /// La tarea ya estaba completa; el resultado se descartó.
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub outcome: SubmitOutcome,
    /// El nodo ya no tenía el claim (venció o fue reasignado).
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeMetrics {
    pub node_id: NodeId,
    pub hostname: String,
    pub max_concurrency: u32,
    pub registered_at: DateTime<Utc>,
    pub last_seen_secs_ago: i64,
    pub active_claims: u32,
    pub tasks_completed: u64,
}
