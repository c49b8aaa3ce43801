use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::error::{FarmError, Result};
use crate::job::JobId;
use crate::payload::{PayloadKind, TaskPayload};
use crate::record::{Record, Serializable, TaskRecord};

pub type TaskId = String;
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ignored,
    Completed,
    Assignable,
    Claimed,
}

/// Payload de la tarea tal como quedó después de crearla o restaurarla.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSlot {
    Loaded(TaskPayload),
    /// El registro traía un tipo desconocido o campos inválidos. Guardamos el
    /// tag y el registro crudos para devolverlos al store tal cual.
    Unusable { info_type: String, info: Record },
}

/// Lo que cruza la frontera de serialización.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentState {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub ignore: bool,
    pub complete: bool,
    pub payload: PayloadSlot,
}

/// Estado de la sesión actual del master. Nunca se persiste.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    nodes_working: BTreeSet<NodeId>,
}

impl SessionState {
    pub fn in_progress(&self) -> bool {
        !self.nodes_working.is_empty()
    }
}

/// Unidad asignable de trabajo dentro de un job.
///
/// Todas las transiciones toman `&mut self`: quien las llama tiene que tener el
/// lock de la tarea, y eso es lo que hace atómico el check-then-act del claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    persistent: PersistentState,
    session: SessionState,
}

impl Task {
    pub fn new(job_id: impl Into<JobId>, payload: TaskPayload) -> Self {
        Self {
            persistent: PersistentState {
                task_id: uuid::Uuid::new_v4().to_string(),
                job_id: job_id.into(),
                ignore: false,
                complete: false,
                payload: PayloadSlot::Loaded(payload),
            },
            session: SessionState::default(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.persistent.task_id
    }

    pub fn job_id(&self) -> &str {
        &self.persistent.job_id
    }

    pub fn is_ignored(&self) -> bool {
        self.persistent.ignore
    }

    pub fn is_complete(&self) -> bool {
        self.persistent.complete
    }

    pub fn in_progress(&self) -> bool {
        self.session.in_progress()
    }

    pub fn nodes_working(&self) -> impl Iterator<Item = &NodeId> {
        self.session.nodes_working.iter()
    }

    pub fn is_worked_by(&self, node_id: &str) -> bool {
        self.session.nodes_working.contains(node_id)
    }

    /// `None` si el payload no se pudo restaurar: la tarea no es ejecutable
    /// hasta que alguien repare el registro.
    pub fn payload(&self) -> Option<&TaskPayload> {
        match &self.persistent.payload {
            PayloadSlot::Loaded(p) => Some(p),
            PayloadSlot::Unusable { .. } => None,
        }
    }

    pub fn persistent(&self) -> &PersistentState {
        &self.persistent
    }

    pub fn status(&self) -> TaskStatus {
        if self.persistent.ignore {
            TaskStatus::Ignored
        } else if self.persistent.complete {
            TaskStatus::Completed
        } else if self.in_progress() {
            TaskStatus::Claimed
        } else {
            TaskStatus::Assignable
        }
    }

    /// Única compuerta que consulta el loop de asignación.
    pub fn should_execute(&self) -> bool {
        if self.persistent.complete {
            return false;
        }

        if self.in_progress() {
            return false;
        }

        if self.persistent.ignore {
            return false;
        }

        true
    }

    /// Assignable → Claimed.
    pub fn try_claim(&mut self, node_id: &str) -> Result<()> {
        self.check_claimable()?;
        if self.in_progress() {
            return Err(FarmError::RaceOnClaim(self.persistent.task_id.clone()));
        }

        self.session.nodes_working.insert(node_id.to_string());
        Ok(())
    }

    /// Suma otro nodo a una tarea ya tomada, mientras haya menos de `max_nodes`.
    /// Es la política de redundancia explícita; por defecto no se usa.
    pub fn try_join(&mut self, node_id: &str, max_nodes: usize) -> Result<()> {
        self.check_claimable()?;
        let working = &self.session.nodes_working;
        if working.contains(node_id) || working.len() >= max_nodes {
            return Err(FarmError::RaceOnClaim(self.persistent.task_id.clone()));
        }

        self.session.nodes_working.insert(node_id.to_string());
        Ok(())
    }

    fn check_claimable(&self) -> Result<()> {
        let task_id = &self.persistent.task_id;
        if self.persistent.ignore {
            return Err(FarmError::TaskIgnored(task_id.clone()));
        }
        if self.persistent.complete {
            return Err(FarmError::DuplicateCompletion(task_id.clone()));
        }
        if self.payload().is_none() {
            return Err(FarmError::MissingPayload(task_id.clone()));
        }
        Ok(())
    }

    /// Claimed → Assignable cuando se va el último nodo.
    /// Devuelve `true` si el nodo estaba trabajando la tarea.
    pub fn release(&mut self, node_id: &str) -> bool {
        self.session.nodes_working.remove(node_id)
    }

    /// Claimed → Completed. Sólo la primera llamada devuelve `true`; los demás
    /// claims en vuelo quedan terminados.
    pub fn mark_complete(&mut self) -> bool {
        if self.persistent.complete {
            return false;
        }

        self.persistent.complete = true;
        self.session.nodes_working.clear();
        true
    }

    /// Cualquier estado → Ignored. Devuelve `false` si ya estaba ignorada.
    pub fn set_ignored(&mut self) -> bool {
        let first = !self.persistent.ignore;
        self.persistent.ignore = true;
        self.session.nodes_working.clear();
        first
    }

    /// Restaura la tarea y devuelve aparte el diagnóstico del payload, si lo hubo.
    /// Un payload roto nunca impide cargar el resto de la tarea.
    pub fn restore_with_diagnostic(record: TaskRecord) -> (Self, Option<FarmError>) {
        let TaskRecord {
            job_id,
            task_id,
            ignore,
            complete,
            task_info_type,
            task_info,
        } = record;

        let (payload, diagnostic) =
            match TaskPayload::from_tagged(&task_info_type, task_info.clone()) {
                Ok(p) => (PayloadSlot::Loaded(p), None),
                Err(e) => (
                    PayloadSlot::Unusable {
                        info_type: task_info_type,
                        info: task_info,
                    },
                    Some(e),
                ),
            };

        let task = Self {
            persistent: PersistentState {
                task_id,
                job_id,
                ignore,
                complete,
                payload,
            },
            session: SessionState::default(),
        };

        (task, diagnostic)
    }
}

impl Serializable for Task {
    type Record = TaskRecord;

    fn serialize(&self) -> TaskRecord {
        let p = &self.persistent;
        let (task_info_type, task_info) = match &p.payload {
            PayloadSlot::Loaded(payload) => {
                (payload.get_info_type().to_string(), payload.to_record())
            }
            PayloadSlot::Unusable { info_type, info } => (info_type.clone(), info.clone()),
        };

        TaskRecord {
            job_id: p.job_id.clone(),
            task_id: p.task_id.clone(),
            ignore: p.ignore,
            complete: p.complete,
            task_info_type,
            task_info,
        }
    }

    fn restore(record: TaskRecord) -> Result<Self> {
        let (task, diagnostic) = Self::restore_with_diagnostic(record);
        if let Some(e) = diagnostic {
            warn!(
                "tarea {} del job {} cargada sin payload: {}",
                task.task_id(),
                task.job_id(),
                e
            );
        }
        Ok(task)
    }
}

/// Vista de una tarea para la API (listados de job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: TaskStatus,
    pub nodes_working: Vec<NodeId>,
    pub task_info_type: String,
    pub frame: Option<u64>,
    /// `false` si el payload no se pudo restaurar.
    pub executable: bool,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        let task_info_type = match &task.persistent.payload {
            PayloadSlot::Loaded(p) => p.get_info_type().to_string(),
            PayloadSlot::Unusable { info_type, .. } => info_type.clone(),
        };

        TaskView {
            task_id: task.task_id().to_string(),
            job_id: task.job_id().to_string(),
            status: task.status(),
            nodes_working: task.nodes_working().cloned().collect(),
            task_info_type,
            frame: task.payload().and_then(|p| p.as_render()).map(|r| r.frame),
            executable: task.payload().is_some(),
        }
    }
}

/// Lo que recibe un nodo al tomar una tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub task_info_type: String,
    pub task_info: Record,
}

impl TaskAssignment {
    pub fn for_task(task: &Task) -> Result<Self> {
        let payload = task
            .payload()
            .ok_or_else(|| FarmError::MissingPayload(task.task_id().to_string()))?;

        Ok(TaskAssignment {
            task_id: task.task_id().to_string(),
            job_id: task.job_id().to_string(),
            task_info_type: payload.get_info_type().to_string(),
            task_info: payload.to_record(),
        })
    }

    pub fn payload(&self) -> Result<TaskPayload> {
        let kind: PayloadKind = self.task_info_type.parse()?;
        TaskPayload::from_record(kind, self.task_info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{RenderPayload, Resolution};
    use serde_json::{json, Value};
    use std::path::PathBuf;

    fn render_task(job_id: &str, frame: u64) -> Task {
        Task::new(job_id, TaskPayload::Render(RenderPayload::new(frame)))
    }

    fn record_with_type(info_type: &str) -> TaskRecord {
        TaskRecord {
            job_id: "J1".to_string(),
            task_id: "T-bogus".to_string(),
            ignore: false,
            complete: true,
            task_info_type: info_type.to_string(),
            task_info: json!({"frame": 3}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn tarea_nueva_es_asignable() {
        let t = render_task("J1", 1);
        assert_eq!(t.status(), TaskStatus::Assignable);
        assert!(t.should_execute());
        assert!(!t.in_progress());
        assert_eq!(t.nodes_working().count(), 0);
    }

    #[test]
    fn ids_de_tareas_son_unicos() {
        let a = render_task("J1", 1);
        let b = render_task("J1", 1);
        assert_ne!(a.task_id(), b.task_id());
    }

    #[test]
    fn should_execute_tabla_de_verdad() {
        for complete in [false, true] {
            for claimed in [false, true] {
                for ignore in [false, true] {
                    let mut t = render_task("J1", 0);
                    if claimed {
                        t.try_claim("nodeA").unwrap();
                    }
                    t.persistent.complete = complete;
                    t.persistent.ignore = ignore;

                    let expected = !(complete || claimed || ignore);
                    assert_eq!(
                        t.should_execute(),
                        expected,
                        "complete={complete} in_progress={claimed} ignore={ignore}"
                    );
                }
            }
        }
    }

    #[test]
    fn claim_marca_en_progreso_y_registra_nodo() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();

        assert_eq!(t.status(), TaskStatus::Claimed);
        assert!(t.in_progress());
        assert!(t.is_worked_by("nodeA"));
        assert!(!t.should_execute());
    }

    #[test]
    fn segundo_claim_pierde_la_carrera() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();

        let err = t.try_claim("nodeB").unwrap_err();
        assert!(matches!(err, FarmError::RaceOnClaim(_)));
        assert!(!t.is_worked_by("nodeB"));
    }

    #[test]
    fn release_del_ultimo_nodo_vuelve_a_asignable() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();
        t.try_join("nodeB", 2).unwrap();

        assert!(t.release("nodeA"));
        assert_eq!(t.status(), TaskStatus::Claimed);

        assert!(t.release("nodeB"));
        assert_eq!(t.status(), TaskStatus::Assignable);
        assert!(t.should_execute());

        assert!(!t.release("nodeB"));
    }

    #[test]
    fn try_join_respeta_el_maximo_de_nodos() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();

        assert!(t.try_join("nodeB", 1).is_err());
        assert!(t.try_join("nodeA", 3).is_err());
        t.try_join("nodeB", 2).unwrap();
        assert!(t.try_join("nodeC", 2).is_err());
        assert_eq!(t.nodes_working().count(), 2);
    }

    #[test]
    fn completar_termina_todos_los_claims_y_es_idempotente() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();
        t.try_join("nodeB", 2).unwrap();

        assert!(t.mark_complete());
        assert_eq!(t.status(), TaskStatus::Completed);
        assert_eq!(t.nodes_working().count(), 0);

        assert!(!t.mark_complete());
        assert!(t.is_complete());
    }

    #[test]
    fn completada_no_tiene_transiciones_de_salida() {
        let mut t = render_task("J1", 1);
        t.mark_complete();

        assert!(matches!(
            t.try_claim("nodeA"),
            Err(FarmError::DuplicateCompletion(_))
        ));
        assert!(t.try_join("nodeA", 5).is_err());
        assert!(!t.release("nodeA"));
        assert_eq!(t.status(), TaskStatus::Completed);
    }

    #[test]
    fn ignorar_gana_sobre_cualquier_estado() {
        let mut t = render_task("J1", 1);
        t.try_claim("nodeA").unwrap();

        assert!(t.set_ignored());
        assert_eq!(t.status(), TaskStatus::Ignored);
        assert!(!t.should_execute());
        assert!(matches!(t.try_claim("nodeB"), Err(FarmError::TaskIgnored(_))));
        assert!(!t.set_ignored());
    }

    #[test]
    fn serialize_restore_reproduce_campos_persistidos() {
        let mut t = Task::new(
            "J9",
            TaskPayload::Render(RenderPayload::new(12).with_resolution(Resolution(640, 480))),
        );
        t.set_ignored();

        let restored = Task::restore(t.serialize()).unwrap();

        assert_eq!(restored.persistent(), t.persistent());
        assert_eq!(restored.serialize(), t.serialize());
    }

    #[test]
    fn escenario_render_j1_frame_5() {
        let t = render_task("J1", 5);
        let rec = t.serialize();

        assert_eq!(rec.task_info_type, "render");
        assert_eq!(
            Value::Object(rec.task_info.clone()),
            json!({"resolution": [1920, 1080], "frame": 5})
        );

        let restored = Task::restore(rec).unwrap();
        let path = restored.payload().unwrap().result_path("J1").unwrap();
        assert_eq!(path, PathBuf::from("result/J1/5.png"));
    }

    #[test]
    fn escenario_en_progreso_vuelve_asignable_al_restaurar() {
        let mut t = render_task("J1", 2);
        t.try_claim("nodeA").unwrap();
        assert!(t.in_progress());

        let restored = Task::restore(t.serialize()).unwrap();

        assert!(!restored.in_progress());
        assert_eq!(restored.nodes_working().count(), 0);
        assert!(restored.should_execute());
    }

    #[test]
    fn escenario_tipo_bogus_carga_sin_payload() {
        let (t, diagnostic) = Task::restore_with_diagnostic(record_with_type("bogus"));

        assert!(matches!(diagnostic, Some(FarmError::MalformedPayload { .. })));
        assert_eq!(t.task_id(), "T-bogus");
        assert_eq!(t.job_id(), "J1");
        assert!(t.is_complete());
        assert!(!t.is_ignored());
        assert!(t.payload().is_none());
    }

    #[test]
    fn tarea_sin_payload_no_se_puede_tomar() {
        let mut rec = record_with_type("bogus");
        rec.complete = false;
        let mut t = Task::restore(rec).unwrap();

        assert!(t.should_execute());
        assert!(matches!(t.try_claim("nodeA"), Err(FarmError::MissingPayload(_))));
    }

    #[test]
    fn tarea_sin_payload_se_reserializa_tal_cual() {
        let rec = record_with_type("bogus");
        let t = Task::restore(rec.clone()).unwrap();
        assert_eq!(t.serialize(), rec);
    }

    #[test]
    fn render_con_campos_faltantes_queda_sin_payload() {
        let mut rec = record_with_type("render");
        rec.task_info = Record::new();

        let (t, diagnostic) = Task::restore_with_diagnostic(rec);
        assert!(diagnostic.is_some());
        assert!(t.payload().is_none());
    }

    #[test]
    fn task_view_refleja_estado() {
        let mut t = render_task("J1", 7);
        t.try_claim("nodeA").unwrap();

        let view = TaskView::from(&t);
        assert_eq!(view.status, TaskStatus::Claimed);
        assert_eq!(view.nodes_working, vec!["nodeA".to_string()]);
        assert_eq!(view.frame, Some(7));
        assert_eq!(view.task_info_type, "render");
        assert!(view.executable);
    }

    #[test]
    fn assignment_lleva_el_payload_completo() {
        let t = render_task("J1", 3);
        let a = TaskAssignment::for_task(&t).unwrap();

        assert_eq!(a.task_id, t.task_id());
        assert_eq!(a.payload().unwrap(), *t.payload().unwrap());
    }
}
