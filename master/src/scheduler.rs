use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use common::{
    FarmError, JobId, JobInfo, JobRequest, JobResults, NodeId, RenderPayload, Result, ResultSink,
    Serializable, SubmitOutcome, SubmitResultResponse, Task, TaskAssignment, TaskId,
    TaskPayload, TaskRecord, TaskStatus, TaskView,
};

use crate::claims::ClaimTracker;
use crate::config::ClaimPolicy;
use crate::store::{DocumentStore, JOBS, TASKS};

/// Límite de tareas por job, para que un rango de frames absurdo no tumbe al master.
pub const MAX_TASKS_PER_JOB: usize = 100_000;

pub type SharedTask = Arc<Mutex<Task>>;

/// Cada tarea tiene su propio mutex; el claim (should_execute + marcar) ocurre
/// entero bajo ese lock.
#[derive(Default)]
struct TaskBoard {
    order: Vec<TaskId>,
    by_id: HashMap<TaskId, SharedTask>,
}

impl TaskBoard {
    fn push(&mut self, task: Task) {
        let id = task.task_id().to_string();
        self.order.push(id.clone());
        self.by_id.insert(id, Arc::new(Mutex::new(task)));
    }
}

/// Resultado de cargar el estado desde el store.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub jobs_loaded: usize,
    pub tasks_loaded: usize,
    /// Documentos o payloads que no se pudieron interpretar.
    pub diagnostics: Vec<String>,
}

// Un panic en otro hilo no debe dejar la granja sin asignar tareas.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// Máquina de asignación del master.
///
/// Orden de locks: board → tarea → claims → jobs. Nadie toma el lock de una
/// tarea teniendo `claims` o `jobs`.
pub struct Scheduler {
    store: Arc<dyn DocumentStore>,
    sink: ResultSink,
    policy: ClaimPolicy,
    board: RwLock<TaskBoard>,
    claims: Mutex<ClaimTracker>,
    jobs: Mutex<HashMap<JobId, JobInfo>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DocumentStore>, sink: ResultSink, policy: ClaimPolicy) -> Self {
        Self {
            store,
            sink,
            policy,
            board: RwLock::new(TaskBoard::default()),
            claims: Mutex::new(ClaimTracker::new()),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Reconstruye jobs y tareas desde el store. Toda tarea vuelve como "no en
    /// progreso": esto tiene que correr antes de aceptar pedidos de nodos.
    pub fn load(
        store: Arc<dyn DocumentStore>,
        sink: ResultSink,
        policy: ClaimPolicy,
    ) -> Result<(Self, LoadReport)> {
        let mut report = LoadReport::default();

        let mut jobs: HashMap<JobId, JobInfo> = HashMap::new();
        for (key, doc) in store.list(JOBS)? {
            match serde_json::from_value::<JobInfo>(doc) {
                Ok(job) => {
                    jobs.insert(job.id.clone(), job);
                }
                Err(e) => {
                    warn!("job {} ilegible en el store: {}", key, e);
                    report.diagnostics.push(format!("job {key}: {e}"));
                }
            }
        }

        let mut tasks: Vec<Task> = Vec::new();
        for (key, doc) in store.list(TASKS)? {
            let record = match TaskRecord::from_value(doc) {
                Ok(r) => r,
                Err(e) => {
                    warn!("tarea {} ilegible en el store: {}", key, e);
                    report.diagnostics.push(format!("tarea {key}: {e}"));
                    continue;
                }
            };

            let (task, diagnostic) = Task::restore_with_diagnostic(record);
            if let Some(e) = diagnostic {
                warn!(
                    "tarea {} del job {} cargada sin payload: {}",
                    task.task_id(),
                    task.job_id(),
                    e
                );
                report
                    .diagnostics
                    .push(format!("tarea {}: {}", task.task_id(), e));
            }
            tasks.push(task);
        }

        // una tarea sin job no la cuenta nadie: no entra al tablero
        tasks.retain(|task| {
            if jobs.contains_key(task.job_id()) {
                return true;
            }
            warn!(
                "tarea {} apunta a job inexistente {}, no se carga",
                task.task_id(),
                task.job_id()
            );
            report.diagnostics.push(format!(
                "tarea {}: job {} inexistente",
                task.task_id(),
                task.job_id()
            ));
            false
        });

        // los contadores se recalculan: el store de tareas manda
        for job in jobs.values_mut() {
            job.completed_tasks = 0;
            job.ignored_tasks = 0;
        }
        for task in &tasks {
            match jobs.get_mut(task.job_id()) {
                Some(job) if task.is_ignored() => job.ignored_tasks += 1,
                Some(job) if task.is_complete() => job.completed_tasks += 1,
                _ => {}
            }
        }
        for job in jobs.values_mut() {
            job.refresh_status();
        }

        // jobs más viejos primero, y dentro de cada job por frame
        tasks.sort_by_cached_key(|t| {
            (
                jobs.get(t.job_id()).map(|j| j.submitted_at),
                t.job_id().to_string(),
                t.payload().and_then(|p| p.as_render()).map(|r| r.frame),
                t.task_id().to_string(),
            )
        });

        report.jobs_loaded = jobs.len();
        report.tasks_loaded = tasks.len();

        let scheduler = Self::new(store, sink, policy);
        {
            let mut board = write(&scheduler.board);
            for task in tasks {
                board.push(task);
            }
        }
        *lock(&scheduler.jobs) = jobs;

        info!(
            "estado cargado: {} jobs, {} tareas, {} diagnósticos",
            report.jobs_loaded,
            report.tasks_loaded,
            report.diagnostics.len()
        );
        Ok((scheduler, report))
    }

    fn persist_task(&self, task: &Task) -> Result<()> {
        let record = task.serialize();
        self.store.put(TASKS, task.task_id(), &record.to_value()?)
    }

    fn persist_job(&self, job: &JobInfo) -> Result<()> {
        self.store.put(JOBS, &job.id, &serde_json::to_value(job)?)
    }

    fn lookup(&self, task_id: &str) -> Option<SharedTask> {
        read(&self.board).by_id.get(task_id).cloned()
    }

    pub(crate) fn task(&self, task_id: &str) -> Result<SharedTask> {
        self.lookup(task_id)
            .ok_or_else(|| FarmError::TaskNotFound(task_id.to_string()))
    }

    fn snapshot(&self) -> Vec<SharedTask> {
        let board = read(&self.board);
        board
            .order
            .iter()
            .filter_map(|id| board.by_id.get(id).cloned())
            .collect()
    }

    /// Crea un job con una tarea de render por frame.
    pub fn create_job(&self, req: JobRequest) -> Result<JobInfo> {
        req.validate()?;

        let count = (req.frame_end - req.frame_start).saturating_add(1);
        if count > MAX_TASKS_PER_JOB as u64 {
            return Err(FarmError::InvalidJob(format!(
                "{count} frames supera el máximo de {MAX_TASKS_PER_JOB} tareas por job"
            )));
        }

        let resolution = req.resolution.unwrap_or_default();
        let mut job = JobInfo::new(req.name.clone(), count as u32);
        job.refresh_status();

        let tasks: Vec<Task> = req
            .frames()
            .map(|frame| {
                let payload = RenderPayload::new(frame).with_resolution(resolution);
                Task::new(job.id.clone(), TaskPayload::Render(payload))
            })
            .collect();

        // primero lo durable; si falla, el job no existe para nadie
        for task in &tasks {
            self.persist_task(task)?;
        }
        self.persist_job(&job)?;

        lock(&self.jobs).insert(job.id.clone(), job.clone());
        {
            let mut board = write(&self.board);
            for task in tasks {
                board.push(task);
            }
        }

        info!(
            "job {} '{}' creado: frames {}..={} a {} ({} tareas)",
            job.id, job.name, req.frame_start, req.frame_end, resolution, job.total_tasks
        );
        Ok(job)
    }

    /// `claim_next_assignable_task`: primera tarea asignable, o `None`.
    pub fn claim_next(&self, node_id: &str) -> Option<TaskAssignment> {
        let candidates = self.snapshot();

        let mut claimed = self.claim_first(&candidates, node_id, |task, node| {
            if !task.should_execute() {
                return Err(FarmError::RaceOnClaim(task.task_id().to_string()));
            }
            task.try_claim(node)
        });

        if claimed.is_none() {
            if let ClaimPolicy::Redundant { max_nodes } = self.policy {
                claimed = self.claim_first(&candidates, node_id, |task, node| {
                    if task.status() != TaskStatus::Claimed {
                        return Err(FarmError::RaceOnClaim(task.task_id().to_string()));
                    }
                    task.try_join(node, max_nodes)
                });
            }
        }

        match claimed {
            Some(assignment) => {
                self.mark_job_started(&assignment.job_id);
                info!(
                    "tarea {} (job {}) asignada al nodo {}",
                    assignment.task_id, assignment.job_id, node_id
                );
                Some(assignment)
            }
            None => {
                debug!("nodo {} pidió tarea pero no hay asignables", node_id);
                None
            }
        }
    }

    fn claim_first<F>(&self, candidates: &[SharedTask], node_id: &str, claim: F) -> Option<TaskAssignment>
    where
        F: Fn(&mut Task, &str) -> Result<()>,
    {
        for shared in candidates {
            let mut task = lock(shared);

            // sin payload no hay nada que mandarle al nodo
            let Ok(assignment) = TaskAssignment::for_task(&task) else {
                continue;
            };

            match claim(&mut task, node_id) {
                Ok(()) => {
                    lock(&self.claims).record(task.task_id(), node_id, Instant::now());
                    return Some(assignment);
                }
                Err(FarmError::RaceOnClaim(_)) => continue,
                Err(e) => {
                    debug!("tarea {} no asignable: {}", task.task_id(), e);
                    continue;
                }
            }
        }
        None
    }

    fn mark_job_started(&self, job_id: &str) {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.started_at.is_some() {
            return;
        }
        job.mark_started();
        if let Err(e) = self.persist_job(job) {
            warn!("no se pudo persistir el inicio del job {}: {}", job_id, e);
        }
    }

    /// Aplica `f` al job, refresca su estado y lo persiste, todo bajo el lock
    /// de jobs. Quien cambia el estado de una tarea lo llama con el lock de la
    /// tarea tomado, así transición y contador son una sola operación.
    fn update_job(&self, job_id: &str, f: impl FnOnce(&mut JobInfo)) {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };

        let was_finished = job.is_finished();
        f(job);
        job.refresh_status();
        if !was_finished && job.is_finished() {
            info!("job {} '{}' terminado", job.id, job.name);
        }

        if let Err(e) = self.persist_job(job) {
            warn!("no se pudo persistir el job {}: {}", job_id, e);
        }
    }

    /// `submit_result`: escribe los bytes y completa la tarea. El primero que
    /// llega gana; los siguientes se guardan aparte sin tocar contadores.
    pub fn submit_result(
        &self,
        task_id: &str,
        node_id: &str,
        data: &[u8],
    ) -> Result<SubmitResultResponse> {
        let shared = self.task(task_id)?;
        let mut task = lock(&shared);

        if task.is_ignored() {
            return Err(FarmError::TaskIgnored(task_id.to_string()));
        }

        let stale = !task.is_worked_by(node_id);

        if task.is_complete() {
            info!(
                "{}: resultado del nodo {} guardado como duplicado",
                FarmError::DuplicateCompletion(task_id.to_string()),
                node_id
            );
            if let Err(e) = self.sink.write_duplicate(&task, node_id, data) {
                warn!(
                    "no se pudo guardar el duplicado de la tarea {} (nodo {}): {}",
                    task_id, node_id, e
                );
            }
            lock(&self.claims).remove(task_id, node_id);
            return Ok(SubmitResultResponse {
                outcome: SubmitOutcome::Duplicate,
                stale,
            });
        }

        if stale {
            warn!(
                "{}; se acepta igual porque la tarea sigue pendiente",
                FarmError::StaleClaim {
                    task_id: task_id.to_string(),
                    node_id: node_id.to_string(),
                }
            );
        }

        // si la escritura falla la tarea sigue pendiente
        let path = self.sink.write_result(&task, data).map_err(|e| {
            warn!("no se pudo escribir el resultado de la tarea {}: {}", task_id, e);
            e
        })?;

        task.mark_complete();
        if let Err(e) = self.persist_task(&task) {
            warn!(
                "tarea {} completa pero no persistida, se re-renderizará al reiniciar: {}",
                task_id, e
            );
        }

        let dropped = lock(&self.claims).remove_task(task_id);
        for other in dropped.iter().filter(|n| n.as_str() != node_id) {
            info!("claim del nodo {} sobre la tarea {} terminado", other, task_id);
        }

        info!(
            "tarea {} completada por el nodo {} → {}",
            task_id,
            node_id,
            path.display()
        );

        self.update_job(task.job_id(), |job| job.completed_tasks += 1);

        Ok(SubmitResultResponse {
            outcome: SubmitOutcome::Accepted,
            stale,
        })
    }

    /// `release_claim`: el nodo abandona la tarea (falla o cancelación).
    pub fn release_claim(&self, task_id: &str, node_id: &str) -> Result<bool> {
        let shared = self.task(task_id)?;
        let mut task = lock(&shared);

        let released = task.release(node_id);
        lock(&self.claims).remove(task_id, node_id);

        if released {
            info!(
                "nodo {} liberó la tarea {} (estado ahora {:?})",
                node_id,
                task_id,
                task.status()
            );
        }
        Ok(released)
    }

    /// Refresca la edad del claim. Si ya no existe, el nodo debe abandonar.
    pub fn heartbeat(&self, task_id: &str, node_id: &str) -> Result<()> {
        let shared = self.task(task_id)?;
        let task = lock(&shared);

        if !task.is_worked_by(node_id) {
            return Err(FarmError::StaleClaim {
                task_id: task_id.to_string(),
                node_id: node_id.to_string(),
            });
        }

        let mut claims = lock(&self.claims);
        let now = Instant::now();
        if !claims.touch(task_id, node_id, now) {
            claims.record(task_id, node_id, now);
        }
        Ok(())
    }

    /// Acción administrativa: la tarea no se vuelve a asignar nunca.
    pub fn set_ignored(&self, task_id: &str) -> Result<bool> {
        let shared = self.task(task_id)?;
        let mut task = lock(&shared);

        let was_complete = task.is_complete();
        if !task.set_ignored() {
            return Ok(false);
        }
        lock(&self.claims).remove_task(task_id);

        if let Err(e) = self.persist_task(&task) {
            warn!("tarea {} ignorada pero no persistida: {}", task_id, e);
        }
        info!("tarea {} marcada como ignorada", task_id);

        self.update_job(task.job_id(), |job| {
            if was_complete {
                job.completed_tasks = job.completed_tasks.saturating_sub(1);
            }
            job.ignored_tasks += 1;
        });
        Ok(true)
    }

    pub fn reclaim_stale(&self, timeout: Duration) -> Vec<(TaskId, NodeId)> {
        self.reclaim_stale_at(Instant::now(), timeout)
    }

    /// Fuerza Claimed → Assignable para los claims más viejos que `timeout`.
    pub fn reclaim_stale_at(&self, now: Instant, timeout: Duration) -> Vec<(TaskId, NodeId)> {
        let expired = lock(&self.claims).expired(now, timeout);
        let mut reclaimed = Vec::new();

        for (task_id, node_id) in expired {
            let Some(shared) = self.lookup(&task_id) else {
                lock(&self.claims).remove(&task_id, &node_id);
                continue;
            };

            let mut task = lock(&shared);
            {
                let mut claims = lock(&self.claims);
                // pudo haber llegado un heartbeat entre medio
                if !claims.is_expired(&task_id, &node_id, now, timeout) {
                    continue;
                }
                claims.remove(&task_id, &node_id);
            }

            if task.release(&node_id) {
                warn!(
                    "claim del nodo {} sobre la tarea {} venció, vuelve a la cola ({:?})",
                    node_id,
                    task_id,
                    task.status()
                );
                reclaimed.push((task_id, node_id));
            }
        }

        reclaimed
    }

    pub fn job(&self, job_id: &str) -> Result<JobInfo> {
        lock(&self.jobs)
            .get(job_id)
            .cloned()
            .ok_or_else(|| FarmError::JobNotFound(job_id.to_string()))
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    pub fn tasks_for_job(&self, job_id: &str) -> Result<Vec<TaskView>> {
        self.job(job_id)?;
        Ok(self
            .snapshot()
            .iter()
            .filter_map(|shared| {
                let task = lock(shared);
                (task.job_id() == job_id).then(|| TaskView::from(&*task))
            })
            .collect())
    }

    pub fn task_view(&self, task_id: &str) -> Result<TaskView> {
        let shared = self.task(task_id)?;
        let task = lock(&shared);
        Ok(TaskView::from(&*task))
    }

    pub fn job_results(&self, job_id: &str) -> Result<JobResults> {
        self.job(job_id)?;
        self.sink.list_job_results(job_id)
    }

    pub fn active_claims_for(&self, node_id: &str) -> usize {
        lock(&self.claims).active_for_node(node_id)
    }
}
