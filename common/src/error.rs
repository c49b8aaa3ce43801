use thiserror::Error;

use crate::job::JobId;
use crate::task::{NodeId, TaskId};

#[derive(Error, Debug)]
pub enum FarmError {
    /// Campos faltantes o con tipo incorrecto, o un `task_info_type` desconocido.
    #[error("payload malformado (tipo '{info_type}'): {reason}")]
    MalformedPayload { info_type: String, reason: String },

    #[error("la tarea {0} no tiene un payload utilizable")]
    MissingPayload(TaskId),

    #[error("el payload '{info_type}' de la tarea {task_id} no define ubicación de resultado")]
    NoResultLocation { task_id: TaskId, info_type: String },

    #[error("claim vencido: el nodo {node_id} ya no trabaja la tarea {task_id}")]
    StaleClaim { task_id: TaskId, node_id: NodeId },

    #[error("la tarea {0} ya estaba completa")]
    DuplicateCompletion(TaskId),

    #[error("fallo de almacenamiento: {0}")]
    StorageFailure(#[from] std::io::Error),

    #[error("la tarea {0} ya fue tomada por otro nodo")]
    RaceOnClaim(TaskId),

    #[error("la tarea {0} está ignorada")]
    TaskIgnored(TaskId),

    #[error("tarea no encontrada: {0}")]
    TaskNotFound(TaskId),

    #[error("job no encontrado: {0}")]
    JobNotFound(JobId),

    #[error("job inválido: {0}")]
    InvalidJob(String),

    #[error("error de serialización: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FarmError {
    pub fn malformed(info_type: impl Into<String>, reason: impl ToString) -> Self {
        FarmError::MalformedPayload {
            info_type: info_type.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FarmError>;
