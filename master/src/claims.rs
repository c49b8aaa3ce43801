use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use common::{NodeId, TaskId};

/// Edad de cada claim (tarea, nodo). Un nodo caído no avisa nada, así que
/// esta es la única señal para devolver la tarea a la cola.
#[derive(Debug, Default)]
pub struct ClaimTracker {
    claims: HashMap<(TaskId, NodeId), Instant>,
}

impl ClaimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task_id: &str, node_id: &str, now: Instant) {
        self.claims
            .insert((task_id.to_string(), node_id.to_string()), now);
    }

    /// Refresca un claim existente. `false` si no existe (vencido o nunca tomado).
    pub fn touch(&mut self, task_id: &str, node_id: &str, now: Instant) -> bool {
        match self
            .claims
            .get_mut(&(task_id.to_string(), node_id.to_string()))
        {
            Some(at) => {
                *at = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, task_id: &str, node_id: &str) -> bool {
        self.claims
            .remove(&(task_id.to_string(), node_id.to_string()))
            .is_some()
    }

    /// Borra todos los claims de una tarea (completa o ignorada).
    pub fn remove_task(&mut self, task_id: &str) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.claims.retain(|(t, n), _| {
            if t == task_id {
                removed.push(n.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn is_expired(&self, task_id: &str, node_id: &str, now: Instant, timeout: Duration) -> bool {
        self.claims
            .get(&(task_id.to_string(), node_id.to_string()))
            .map(|at| now.saturating_duration_since(*at) > timeout)
            .unwrap_or(false)
    }

    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<(TaskId, NodeId)> {
        let mut out: Vec<(TaskId, NodeId)> = self
            .claims
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) > timeout)
            .map(|(key, _)| key.clone())
            .collect();
        out.sort();
        out
    }

    pub fn active_for_node(&self, node_id: &str) -> usize {
        self.claims.keys().filter(|(_, n)| n == node_id).count()
    }
}
