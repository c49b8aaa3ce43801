use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::{FarmError, Result};
use crate::record::{Record, Serializable};

/// Discriminador de los tipos de payload conocidos.
/// Agregar un tipo nuevo obliga a tocar cada `match` de este módulo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    None,
    Render,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 2] = [PayloadKind::None, PayloadKind::Render];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::None => "none",
            PayloadKind::Render => "render",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = FarmError;

    fn from_str(tag: &str) -> Result<Self> {
        PayloadKind::ALL
            .into_iter()
            .find(|k| k.as_str() == tag)
            .ok_or_else(|| FarmError::malformed(tag, "tipo de payload desconocido"))
    }
}

/// Resolución de salida, se serializa como `[ancho, alto]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution(pub u32, pub u32);

impl Resolution {
    pub fn width(&self) -> u32 {
        self.0
    }

    pub fn height(&self) -> u32 {
        self.1
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution(1920, 1080)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.1)
    }
}

/// Datos de un frame a renderizar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPayload {
    pub resolution: Resolution,
    pub frame: u64,
}

impl RenderPayload {
    pub fn new(frame: u64) -> Self {
        Self {
            resolution: Resolution::default(),
            frame,
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Ruta relativa del resultado: `result/<job_id>/<frame>.png`.
    pub fn result_path(&self, job_id: &str) -> PathBuf {
        PathBuf::from("result")
            .join(job_id)
            .join(format!("{}.png", self.frame))
    }
}

impl Serializable for RenderPayload {
    type Record = Record;

    fn serialize(&self) -> Record {
        let mut out = Record::new();
        out.insert(
            "resolution".to_string(),
            Value::from(vec![self.resolution.0, self.resolution.1]),
        );
        out.insert("frame".to_string(), Value::from(self.frame));
        out
    }

    fn restore(record: Record) -> Result<Self> {
        serde_json::from_value(Value::Object(record))
            .map_err(|e| FarmError::malformed(PayloadKind::Render.as_str(), e))
    }
}

/// Descripción polimórfica del trabajo de una tarea.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskPayload {
    #[default]
    None,
    Render(RenderPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            TaskPayload::None => PayloadKind::None,
            TaskPayload::Render(_) => PayloadKind::Render,
        }
    }

    pub fn get_info_type(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn to_record(&self) -> Record {
        match self {
            TaskPayload::None => Record::new(),
            TaskPayload::Render(render) => Serializable::serialize(render),
        }
    }

    pub fn from_record(kind: PayloadKind, record: Record) -> Result<Self> {
        match kind {
            PayloadKind::None => Ok(TaskPayload::None),
            PayloadKind::Render => RenderPayload::restore(record).map(TaskPayload::Render),
        }
    }

    /// Igual que `from_record` pero a partir del tag en texto guardado en el store.
    pub fn from_tagged(info_type: &str, record: Record) -> Result<Self> {
        let kind: PayloadKind = info_type.parse()?;
        Self::from_record(kind, record)
    }

    /// `None` para payloads que no producen archivo.
    pub fn result_path(&self, job_id: &str) -> Option<PathBuf> {
        match self {
            TaskPayload::None => None,
            TaskPayload::Render(render) => Some(render.result_path(job_id)),
        }
    }

    pub fn as_render(&self) -> Option<&RenderPayload> {
        match self {
            TaskPayload::Render(render) => Some(render),
            TaskPayload::None => None,
        }
    }
}

/// El registro de un payload va siempre acompañado de su tipo.
impl Serializable for TaskPayload {
    type Record = (PayloadKind, Record);

    fn serialize(&self) -> (PayloadKind, Record) {
        (self.kind(), self.to_record())
    }

    fn restore((kind, record): (PayloadKind, Record)) -> Result<Self> {
        Self::from_record(kind, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn kind_parsea_los_tags_conocidos() {
        assert_eq!("none".parse::<PayloadKind>().unwrap(), PayloadKind::None);
        assert_eq!("render".parse::<PayloadKind>().unwrap(), PayloadKind::Render);
    }

    #[test]
    fn kind_desconocido_es_malformed_payload() {
        let err = "bogus".parse::<PayloadKind>().unwrap_err();
        match err {
            FarmError::MalformedPayload { info_type, .. } => assert_eq!(info_type, "bogus"),
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[test]
    fn render_por_defecto_es_full_hd() {
        let p = RenderPayload::new(0);
        assert_eq!(p.resolution, Resolution(1920, 1080));
        assert_eq!(p.resolution.to_string(), "1920x1080");
    }

    #[test]
    fn none_tiene_registro_vacio_y_sin_resultado() {
        let p = TaskPayload::None;
        assert_eq!(p.get_info_type(), "none");
        assert!(p.to_record().is_empty());
        assert!(p.result_path("J1").is_none());
    }

    #[test]
    fn render_to_record_es_plano() {
        let p = TaskPayload::Render(RenderPayload::new(5));
        assert_eq!(p.get_info_type(), "render");
        assert_eq!(
            Value::Object(p.to_record()),
            json!({"resolution": [1920, 1080], "frame": 5})
        );
    }

    #[test]
    fn registro_de_render_coincide_con_serde() {
        // RenderPayload implementa serde::Serialize y Serializable a la vez
        let p = RenderPayload::new(3).with_resolution(Resolution(640, 480));
        let record = Serializable::serialize(&p);
        assert_eq!(Value::Object(record.clone()), serde_json::to_value(&p).unwrap());
        assert_eq!(TaskPayload::Render(p).to_record(), record);
    }

    #[test]
    fn render_from_record_restaura_campos() {
        let rec = obj(json!({"resolution": [1280, 720], "frame": 42}));
        let p = TaskPayload::from_record(PayloadKind::Render, rec).unwrap();
        assert_eq!(
            p,
            TaskPayload::Render(RenderPayload::new(42).with_resolution(Resolution(1280, 720)))
        );
    }

    #[test]
    fn render_from_record_sin_frame_falla() {
        let rec = obj(json!({"resolution": [1920, 1080]}));
        let err = TaskPayload::from_record(PayloadKind::Render, rec).unwrap_err();
        assert!(matches!(err, FarmError::MalformedPayload { .. }));
    }

    #[test]
    fn render_from_record_con_tipos_incorrectos_falla() {
        let negative = obj(json!({"resolution": [1920, 1080], "frame": -1}));
        assert!(TaskPayload::from_record(PayloadKind::Render, negative).is_err());

        let text = obj(json!({"resolution": "1920x1080", "frame": 1}));
        assert!(TaskPayload::from_record(PayloadKind::Render, text).is_err());
    }

    #[test]
    fn task_payload_serializa_con_su_tipo() {
        let p = TaskPayload::Render(RenderPayload::new(7));
        let (kind, rec) = p.serialize();
        assert_eq!(kind, PayloadKind::Render);
        assert_eq!(TaskPayload::restore((kind, rec)).unwrap(), p);

        assert_eq!(
            TaskPayload::restore((PayloadKind::None, Record::new())).unwrap(),
            TaskPayload::None
        );
    }

    #[test]
    fn from_tagged_rechaza_tag_desconocido() {
        let err = TaskPayload::from_tagged("bogus", Record::new()).unwrap_err();
        assert!(matches!(err, FarmError::MalformedPayload { .. }));
    }

    #[test]
    fn result_path_es_deterministico() {
        let a = RenderPayload::new(5);
        assert_eq!(a.result_path("J1"), PathBuf::from("result/J1/5.png"));
        assert_eq!(a.result_path("J1"), a.result_path("J1"));

        let b = RenderPayload::new(6);
        assert_ne!(a.result_path("J1"), b.result_path("J1"));
    }
}
