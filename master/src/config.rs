use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_RESULT_ROOT: &str = ".";
const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Cómo se reparten los claims de una misma tarea.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// Un solo nodo por tarea.
    Exclusive,
    /// Hasta `max_nodes` nodos renderizando la misma tarea; gana el primero que termina.
    Redundant { max_nodes: usize },
}

impl ClaimPolicy {
    pub fn from_max_nodes(max_nodes: usize) -> Self {
        if max_nodes <= 1 {
            ClaimPolicy::Exclusive
        } else {
            ClaimPolicy::Redundant { max_nodes }
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory,
    Files(PathBuf),
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreBackend,
    /// Raíz bajo la que se escriben los `result/<job>/<frame>.png`.
    pub result_root: PathBuf,
    pub claim_timeout: Duration,
    pub sweep_interval: Duration,
    pub claim_policy: ClaimPolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreBackend::Files(PathBuf::from(DEFAULT_DATA_DIR)),
            result_root: PathBuf::from(DEFAULT_RESULT_ROOT),
            claim_timeout: Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            claim_policy: ClaimPolicy::Exclusive,
        }
    }
}

impl MasterConfig {
    /// Lee la configuración de variables de entorno:
    /// LISTEN_ADDR, DATA_DIR ("memory" = store en memoria), RESULT_ROOT,
    /// CLAIM_TIMEOUT_SECS, SWEEP_INTERVAL_SECS, MAX_NODES_PER_TASK.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .unwrap_or(defaults.listen_addr);

        let store = match lookup("DATA_DIR") {
            Some(dir) if dir == "memory" => StoreBackend::Memory,
            Some(dir) if !dir.is_empty() => StoreBackend::Files(PathBuf::from(dir)),
            _ => defaults.store,
        };

        let result_root = lookup("RESULT_ROOT")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.result_root);

        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let claim_policy = lookup("MAX_NODES_PER_TASK")
            .and_then(|s| s.parse::<usize>().ok())
            .map(ClaimPolicy::from_max_nodes)
            .unwrap_or(defaults.claim_policy);

        Self {
            listen_addr,
            store,
            result_root,
            claim_timeout: secs("CLAIM_TIMEOUT_SECS", defaults.claim_timeout),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            claim_policy,
        }
    }
}
