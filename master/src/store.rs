use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use common::{FarmError, Result};

pub const TASKS: &str = "tasks";
pub const JOBS: &str = "jobs";

/// Store de documentos: una colección por entidad, un documento por clave.
/// Es la frontera de durabilidad del master.
pub trait DocumentStore: Send + Sync {
    fn put(&self, collection: &str, key: &str, doc: &Value) -> Result<()>;

    /// Todos los documentos de la colección, ordenados por clave.
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;
}

/// Store en memoria; se pierde al reiniciar.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn put(&self, collection: &str, key: &str, doc: &Value) -> Result<()> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| io::Error::other("lock memory store"))?;
        docs.entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc.clone());
        Ok(())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| io::Error::other("lock memory store"))?;
        Ok(docs
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// Un archivo JSON por documento: `<root>/<collection>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn doc_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        for part in [collection, key] {
            if part.is_empty() || part.contains(['/', '\\']) || part.starts_with('.') {
                return Err(FarmError::StorageFailure(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("clave de documento inválida: {part:?}"),
                )));
            }
        }
        Ok(self.root.join(collection).join(format!("{key}.json")))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

impl DocumentStore for FileStore {
    fn put(&self, collection: &str, key: &str, doc: &Value) -> Result<()> {
        let path = self.doc_path(collection, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&path, &bytes)?;
        Ok(())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let dir = self.root.join(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            // un documento ilegible no debe impedir cargar los demás
            let doc = match fs::read(&path)
                .map_err(FarmError::from)
                .and_then(|b| serde_json::from_slice::<Value>(&b).map_err(FarmError::from))
            {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!("ignorando documento {}: {}", path.display(), e);
                    continue;
                }
            };

            out.push((key.to_string(), doc));
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        env::temp_dir()
            .join("store_tests")
            .join(format!("{}-{}", sub, uuid::Uuid::new_v4()))
    }

    fn roundtrip(store: &dyn DocumentStore) {
        store.put(TASKS, "b", &json!({"n": 2})).unwrap();
        store.put(TASKS, "a", &json!({"n": 1})).unwrap();
        store.put(TASKS, "a", &json!({"n": 3})).unwrap();
        store.put(JOBS, "j", &json!({"name": "shot"})).unwrap();

        let tasks = store.list(TASKS).unwrap();
        assert_eq!(
            tasks,
            vec![
                ("a".to_string(), json!({"n": 3})),
                ("b".to_string(), json!({"n": 2})),
            ]
        );
        assert_eq!(store.list(JOBS).unwrap().len(), 1);
        assert!(store.list("otra").unwrap().is_empty());
    }

    #[test]
    fn memory_store_guarda_y_lista() {
        roundtrip(&MemoryStore::new());
    }

    #[test]
    fn file_store_guarda_y_lista() {
        let store = FileStore::open(temp_dir("files")).unwrap();
        roundtrip(&store);
    }

    #[test]
    fn file_store_sobrevive_reapertura() {
        let root = temp_dir("reopen");
        FileStore::open(&root)
            .unwrap()
            .put(TASKS, "t1", &json!({"complete": true}))
            .unwrap();

        let reopened = FileStore::open(&root).unwrap();
        assert_eq!(
            reopened.list(TASKS).unwrap(),
            vec![("t1".to_string(), json!({"complete": true}))]
        );
    }

    #[test]
    fn file_store_salta_documentos_corruptos() {
        let root = temp_dir("corrupt");
        let store = FileStore::open(&root).unwrap();
        store.put(TASKS, "ok", &json!({"x": 1})).unwrap();
        fs::write(root.join(TASKS).join("roto.json"), b"{no es json").unwrap();

        let docs = store.list(TASKS).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "ok");
    }

    #[test]
    fn file_store_rechaza_claves_con_rutas() {
        let store = FileStore::open(temp_dir("keys")).unwrap();
        assert!(store.put(TASKS, "../fuera", &json!({})).is_err());
        assert!(store.put(TASKS, "", &json!({})).is_err());
    }
}
