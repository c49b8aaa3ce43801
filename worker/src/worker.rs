use anyhow::{bail, Result};
use common::{
    ClaimRequest, ClaimResponse, NodeRegisterRequest, NodeRegisterResponse, SubmitOutcome,
    SubmitResultResponse, TaskAssignment, TaskAssignmentRequest, TaskAssignmentResponse,
    TaskPayload,
};
use reqwest::{Client, StatusCode};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::render;

/// Conexión de un nodo con el master.
#[derive(Clone)]
struct Node {
    client: Client,
    config: Arc<WorkerConfig>,
    node_id: String,
}

/// Loop principal del worker.
/// - Se registra en el master.
/// - Pide tareas mientras tenga "slots" libres.
/// - Renderiza cada tarea en paralelo (hasta WORKER_CONCURRENCY),
///   con heartbeats del claim mientras dura el render.
pub async fn run() -> Result<()> {
    let config = Arc::new(WorkerConfig::from_env());
    let client = Client::new();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let register_url = format!("{}/api/v1/nodes/register", config.master_url);
    let res = client
        .post(&register_url)
        .json(&NodeRegisterRequest {
            hostname,
            max_concurrency: config.concurrency,
        })
        .send()
        .await?
        .error_for_status()?;
    let NodeRegisterResponse { node_id } = res.json().await?;

    info!(
        "nodo {} registrado con concurrency={} contra {}",
        node_id, config.concurrency, config.master_url
    );

    let node = Node {
        client,
        config: config.clone(),
        node_id,
    };
    let sem = Arc::new(Semaphore::new(config.concurrency as usize));

    loop {
        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        match node.request_task().await {
            Ok(Some(task)) => {
                info!("tengo tarea {} del job {}", task.task_id, task.job_id);
                let node = node.clone();
                tokio::spawn(async move {
                    node.execute(task).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                debug!("nodo {} pidió tarea pero no hay", node.node_id);
                sleep(config.poll_interval).await;
            }
            Err(e) => {
                drop(permit);
                warn!("error pidiendo tarea al master: {:#}", e);
                sleep(config.poll_interval).await;
            }
        }
    }
}

impl Node {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.master_url, path)
    }

    fn claim(&self, task_id: &str) -> ClaimRequest {
        ClaimRequest {
            task_id: task_id.to_string(),
            node_id: self.node_id.clone(),
        }
    }

    async fn request_task(&self) -> Result<Option<TaskAssignment>> {
        let res = self
            .client
            .post(self.url("/api/v1/tasks/next"))
            .json(&TaskAssignmentRequest {
                node_id: self.node_id.clone(),
            })
            .send()
            .await?
            .error_for_status()?;
        let assignment: TaskAssignmentResponse = res.json().await?;
        Ok(assignment.task)
    }

    /// Renderiza una tarea y sube el resultado; si algo falla, devuelve el claim.
    async fn execute(&self, task: TaskAssignment) {
        let heartbeat = self.spawn_heartbeat(task.task_id.clone());

        let outcome = self.render_and_submit(&task).await;
        heartbeat.abort();

        match outcome {
            Ok(resp) => match resp.outcome {
                SubmitOutcome::Accepted if resp.stale => info!(
                    "tarea {} aceptada aunque el claim había vencido",
                    task.task_id
                ),
                SubmitOutcome::Accepted => info!("terminé tarea {} correctamente", task.task_id),
                SubmitOutcome::Duplicate => info!(
                    "tarea {} ya estaba completa, resultado descartado",
                    task.task_id
                ),
            },
            Err(e) => {
                warn!("error procesando tarea {}: {:#}", task.task_id, e);
                if let Err(e) = self.release(&task.task_id).await {
                    warn!("no se pudo liberar la tarea {}: {:#}", task.task_id, e);
                }
            }
        }
    }

    async fn render_and_submit(&self, task: &TaskAssignment) -> Result<SubmitResultResponse> {
        let payload = match task.payload()? {
            TaskPayload::Render(p) => p,
            TaskPayload::None => bail!("la tarea {} no tiene nada que renderizar", task.task_id),
        };

        let template = self.config.render_command.clone();
        let output = render::output_path(&self.config.work_dir, &task.task_id);
        let bytes = tokio::task::spawn_blocking(move || {
            render::render_frame(&template, &payload, &output)
        })
        .await??;

        let res = self
            .client
            .post(self.url(&format!("/api/v1/tasks/{}/result", task.task_id)))
            .query(&[("node_id", self.node_id.as_str())])
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn release(&self, task_id: &str) -> Result<bool> {
        let res = self
            .client
            .post(self.url("/api/v1/tasks/release"))
            .json(&self.claim(task_id))
            .send()
            .await?
            .error_for_status()?;
        let ClaimResponse { ok } = res.json().await?;
        Ok(ok)
    }

    /// Mantiene vivo el claim mientras dura el render. Si el master responde
    /// 409 el claim ya se reasignó y no tiene sentido seguir avisando.
    fn spawn_heartbeat(&self, task_id: String) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(node.config.heartbeat_interval).await;

                let res = node
                    .client
                    .post(node.url("/api/v1/tasks/heartbeat"))
                    .json(&node.claim(&task_id))
                    .send()
                    .await;

                match res {
                    Ok(r) if r.status() == StatusCode::CONFLICT => {
                        warn!("claim de la tarea {} perdido, dejo de enviar heartbeats", task_id);
                        return;
                    }
                    Ok(r) if !r.status().is_success() => {
                        warn!("heartbeat de {} devolvió {}", task_id, r.status());
                    }
                    Ok(_) => debug!("heartbeat de la tarea {}", task_id),
                    Err(e) => warn!("error enviando heartbeat de {}: {}", task_id, e),
                }
            }
        })
    }
}
