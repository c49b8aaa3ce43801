use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{FarmError, Result};
use crate::job::JobId;
use crate::task::Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    /// Directorio donde quedaron los resultados de este job
    pub output_dir: String,
    /// Nombres de archivos dentro de output_dir
    pub files: Vec<String>,
}

/// Escribe los resultados de las tareas bajo un directorio raíz.
#[derive(Debug, Clone)]
pub struct ResultSink {
    root: PathBuf,
}

impl ResultSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ruta absoluta (bajo `root`) donde va el resultado de la tarea.
    pub fn path_for(&self, task: &Task) -> Result<PathBuf> {
        let payload = task
            .payload()
            .ok_or_else(|| FarmError::MissingPayload(task.task_id().to_string()))?;

        let relative =
            payload
                .result_path(task.job_id())
                .ok_or_else(|| FarmError::NoResultLocation {
                    task_id: task.task_id().to_string(),
                    info_type: payload.get_info_type().to_string(),
                })?;

        Ok(self.root.join(relative))
    }

    /// Escribe `data` reemplazando por completo lo que hubiera en esa ruta.
    /// No marca la tarea como completa.
    pub fn write_result(&self, task: &Task, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(task)?;
        write_replacing(&path, task.task_id(), data)?;

        debug!(
            "resultado de tarea {} escrito en {} ({} bytes)",
            task.task_id(),
            path.display(),
            data.len()
        );
        Ok(path)
    }

    /// Ruta para un resultado que llegó con la tarea ya completa:
    /// `result/<job>/duplicates/<frame>.<node>.png`. No aparece en los listados.
    pub fn duplicate_path_for(&self, task: &Task, node_id: &str) -> Result<PathBuf> {
        let path = self.path_for(task)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        // el node_id viene del nodo: solo caracteres seguros para un nombre de archivo
        let node: String = node_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let dir = path
            .parent()
            .map(|p| p.join(DUPLICATES_DIR))
            .unwrap_or_else(|| PathBuf::from(DUPLICATES_DIR));
        Ok(dir.join(format!("{stem}.{node}{ext}")))
    }

    /// Guarda los bytes de un resultado tardío sin tocar el resultado oficial.
    pub fn write_duplicate(&self, task: &Task, node_id: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.duplicate_path_for(task, node_id)?;
        write_replacing(&path, task.task_id(), data)?;

        debug!(
            "resultado duplicado de tarea {} (nodo {}) guardado en {}",
            task.task_id(),
            node_id,
            path.display()
        );
        Ok(path)
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("result").join(job_id)
    }

    /// Lista los archivos de resultado de un job. Directorio inexistente = sin archivos.
    pub fn list_job_results(&self, job_id: &str) -> Result<JobResults> {
        let dir = self.job_dir(job_id);
        let mut files = Vec::new();

        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        if !name.ends_with(".part") {
                            files.push(name.to_string());
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        files.sort();

        Ok(JobResults {
            job_id: job_id.to_string(),
            output_dir: dir.to_string_lossy().to_string(),
            files,
        })
    }
}

const DUPLICATES_DIR: &str = "duplicates";

// se escribe al lado y se renombra: nunca queda un archivo a medias
fn write_replacing(path: &Path, tag: &str, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension(format!("{tag}.part"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{RenderPayload, TaskPayload};
    use std::{env, fs};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir()
            .join("results_tests")
            .join(format!("{}-{}", sub, uuid::Uuid::new_v4()));
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn render_task(job_id: &str, frame: u64) -> Task {
        Task::new(job_id, TaskPayload::Render(RenderPayload::new(frame)))
    }

    #[test]
    fn path_for_cuelga_de_root() {
        let sink = ResultSink::new("/srv/farm");
        let t = render_task("J1", 5);
        assert_eq!(
            sink.path_for(&t).unwrap(),
            PathBuf::from("/srv/farm/result/J1/5.png")
        );
    }

    #[test]
    fn write_result_crea_directorio_y_escribe() {
        let root = temp_dir("write");
        let sink = ResultSink::new(&root);
        let t = render_task("J1", 5);

        let path = sink.write_result(&t, b"PNG-1").unwrap();

        assert_eq!(path, root.join("result/J1/5.png"));
        assert_eq!(fs::read(&path).unwrap(), b"PNG-1");
    }

    #[test]
    fn write_result_reemplaza_contenido_previo() {
        let root = temp_dir("replace");
        let sink = ResultSink::new(&root);
        let t = render_task("J1", 1);

        sink.write_result(&t, b"una salida bastante larga").unwrap();
        let path = sink.write_result(&t, b"corta").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"corta");
    }

    #[test]
    fn payload_none_no_tiene_ubicacion() {
        let sink = ResultSink::new(temp_dir("none"));
        let t = Task::new("J1", TaskPayload::None);

        let err = sink.write_result(&t, b"x").unwrap_err();
        assert!(matches!(err, FarmError::NoResultLocation { .. }));
    }

    #[test]
    fn error_de_io_se_propaga() {
        let root = temp_dir("io");
        // un archivo donde debería ir el directorio "result"
        fs::write(root.join("result"), b"no soy un directorio").unwrap();

        let sink = ResultSink::new(&root);
        let err = sink.write_result(&render_task("J1", 0), b"x").unwrap_err();
        assert!(matches!(err, FarmError::StorageFailure(_)));
    }

    #[test]
    fn duplicado_va_aparte_y_no_se_lista() {
        let root = temp_dir("dup");
        let sink = ResultSink::new(&root);
        let t = render_task("J1", 5);

        sink.write_result(&t, b"oficial").unwrap();
        let dup = sink.write_duplicate(&t, "../nodo B", b"tardio").unwrap();

        assert_eq!(dup, root.join("result/J1/duplicates/5.___nodo_B.png"));
        assert_eq!(fs::read(&dup).unwrap(), b"tardio");
        assert_eq!(fs::read(root.join("result/J1/5.png")).unwrap(), b"oficial");

        let res = sink.list_job_results("J1").unwrap();
        assert_eq!(res.files, vec!["5.png".to_string()]);
    }

    #[test]
    fn list_job_results_lista_ordenado() {
        let root = temp_dir("list");
        let sink = ResultSink::new(&root);
        sink.write_result(&render_task("J1", 2), b"b").unwrap();
        sink.write_result(&render_task("J1", 1), b"a").unwrap();

        let res = sink.list_job_results("J1").unwrap();
        assert_eq!(res.files, vec!["1.png".to_string(), "2.png".to_string()]);

        let empty = sink.list_job_results("J2").unwrap();
        assert!(empty.files.is_empty());
    }
}
