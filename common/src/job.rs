use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FarmError, Result};
use crate::payload::Resolution;

pub type JobId = String;

/// Pedido de un job de render: una tarea por frame en `frame_start..=frame_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub frame_start: u64,
    pub frame_end: u64,
    /// Si no viene, 1920x1080.
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<()> {
        if self.frame_end < self.frame_start {
            return Err(FarmError::InvalidJob(format!(
                "frame_end ({}) menor que frame_start ({})",
                self.frame_end, self.frame_start
            )));
        }
        if let Some(res) = self.resolution {
            if res.width() == 0 || res.height() == 0 {
                return Err(FarmError::InvalidJob(format!("resolución inválida {res}")));
            }
        }
        Ok(())
    }

    pub fn frames(&self) -> impl Iterator<Item = u64> {
        self.frame_start..=self.frame_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Succeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub ignored_tasks: u32,
}

impl JobInfo {
    pub fn new(name: String, total_tasks: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            status: JobStatus::Accepted,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_tasks,
            completed_tasks: 0,
            ignored_tasks: 0,
        }
    }

    /// El job termina cuando toda tarea no ignorada está completa.
    pub fn is_finished(&self) -> bool {
        self.completed_tasks + self.ignored_tasks >= self.total_tasks
    }

    /// Recalcula `status` y `finished_at` a partir de los contadores.
    pub fn refresh_status(&mut self) {
        if self.is_finished() {
            self.status = JobStatus::Succeeded;
            if self.finished_at.is_none() {
                self.finished_at = Some(Utc::now());
            }
        } else if self.started_at.is_some() || self.completed_tasks > 0 {
            self.status = JobStatus::Running;
            self.finished_at = None;
        } else {
            self.status = JobStatus::Accepted;
        }
    }

    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.refresh_status();
    }
}
