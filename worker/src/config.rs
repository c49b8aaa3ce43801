use std::{env, path::PathBuf, time::Duration};

const DEFAULT_MASTER_URL: &str = "http://localhost:8080";
const DEFAULT_CONCURRENCY: u32 = 1;
const DEFAULT_RENDER_COMMAND: &str = "blender -b scene.blend -o {output} -F PNG -x 0 -f {frame}";
const DEFAULT_WORK_DIR: &str = "/tmp/renderfarm";
const DEFAULT_HEARTBEAT_SECS: u64 = 15;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// URL base del master. En Docker: MASTER_URL=http://master:8080
    pub master_url: String,
    pub concurrency: u32,
    /// Plantilla del comando de render; ver `render::expand_template`.
    pub render_command: String,
    pub work_dir: PathBuf,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_url: DEFAULT_MASTER_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            render_command: DEFAULT_RENDER_COMMAND.to_string(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            master_url: non_empty("MASTER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.master_url),
            concurrency: non_empty("WORKER_CONCURRENCY")
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            render_command: non_empty("RENDER_COMMAND").unwrap_or(defaults.render_command),
            work_dir: non_empty("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            heartbeat_interval: non_empty("HEARTBEAT_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            poll_interval: non_empty("POLL_INTERVAL_MS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }
}
