// master/src/state.rs

use chrono::{DateTime, Utc};
use common::NodeId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub nodes: Arc<Mutex<HashMap<NodeId, NodeMeta>>>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            nodes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub hostname: String,
    pub max_concurrency: u32,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    // Métricas
    pub tasks_completed: u64,
}

impl NodeMeta {
    pub fn new(hostname: String, max_concurrency: u32) -> Self {
        let now = Utc::now();
        Self {
            hostname,
            max_concurrency: max_concurrency.max(1),
            registered_at: now,
            last_seen: now,
            tasks_completed: 0,
        }
    }
}
