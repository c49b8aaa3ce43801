use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::job::JobId;
use crate::task::TaskId;

/// Registro plano clave→valor, igual que lo guarda el store de documentos.
pub type Record = Map<String, Value>;

/// Contrato genérico de guardado/restauración.
///
/// `restore(serialize(x))` tiene que reproducir exactamente los campos
/// persistidos de `x`. Lo que no está en el registro (estado de sesión) vuelve
/// siempre con su valor por defecto.
pub trait Serializable: Sized {
    type Record;

    fn serialize(&self) -> Self::Record;

    fn restore(record: Self::Record) -> Result<Self>;
}

/// Forma persistida de una `Task`.
///
/// No hay `in_progress` ni `nodes_working`: un nodo pudo haber subido el
/// resultado mientras el master estaba caído, así que al levantar se
/// re-renderiza todo lo que estaba en curso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub ignore: bool,
    pub complete: bool,
    pub task_info_type: String,
    #[serde(default)]
    pub task_info: Record,
}

impl TaskRecord {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_record_usa_los_nombres_de_campo_del_store() {
        let rec = TaskRecord {
            job_id: "J1".to_string(),
            task_id: "T1".to_string(),
            ignore: false,
            complete: true,
            task_info_type: "render".to_string(),
            task_info: json!({"resolution": [1920, 1080], "frame": 5})
                .as_object()
                .cloned()
                .unwrap(),
        };

        let v = rec.to_value().unwrap();
        assert_eq!(v["job_id"], json!("J1"));
        assert_eq!(v["task_id"], json!("T1"));
        assert_eq!(v["complete"], json!(true));
        assert_eq!(v["task_info_type"], json!("render"));
        assert_eq!(v["task_info"]["frame"], json!(5));
        assert!(v.get("in_progress").is_none());
        assert!(v.get("nodes_working").is_none());
    }

    #[test]
    fn task_record_sin_task_info_se_lee_como_registro_vacio() {
        let v = json!({
            "job_id": "J1",
            "task_id": "T1",
            "ignore": true,
            "complete": false,
            "task_info_type": "none"
        });

        let rec = TaskRecord::from_value(v).unwrap();
        assert!(rec.ignore);
        assert!(rec.task_info.is_empty());
    }

    #[test]
    fn task_record_sin_ids_es_un_error() {
        let v = json!({"ignore": false, "complete": false, "task_info_type": "none"});
        assert!(TaskRecord::from_value(v).is_err());
    }
}
