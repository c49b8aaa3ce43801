use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::state::AppState;

/// Loop de tolerancia a fallos: cada `interval` devuelve a la cola los
/// claims que no recibieron heartbeat dentro de `claim_timeout`.
pub async fn run_failover_loop(state: AppState, interval: Duration, claim_timeout: Duration) {
    loop {
        sleep(interval).await;
        sweep_once(&state, claim_timeout);
    }
}

/// Una pasada del sweeper. Devuelve cuántos claims se liberaron.
fn sweep_once(state: &AppState, claim_timeout: Duration) -> usize {
    let reclaimed = state.scheduler.reclaim_stale(claim_timeout);
    if reclaimed.is_empty() {
        debug!("failover sweep: sin claims vencidos");
        return 0;
    }

    for (task_id, node_id) in &reclaimed {
        info!(
            "claim vencido: tarea {} vuelve a la cola (nodo {} sin heartbeat hace más de {:?})",
            task_id, node_id, claim_timeout
        );
    }
    reclaimed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClaimPolicy;
    use crate::scheduler::Scheduler;
    use crate::store::MemoryStore;
    use common::{JobRequest, ResultSink};
    use std::{env, sync::Arc};

    fn state() -> AppState {
        let root = env::temp_dir()
            .join("failover_tests")
            .join(uuid::Uuid::new_v4().to_string());
        let scheduler = Scheduler::new(
            Arc::new(MemoryStore::new()),
            ResultSink::new(root),
            ClaimPolicy::Exclusive,
        );
        AppState::new(Arc::new(scheduler))
    }

    fn job(frames: u64) -> JobRequest {
        JobRequest {
            name: "shot".to_string(),
            frame_start: 1,
            frame_end: frames,
            resolution: None,
        }
    }

    #[test]
    fn sweep_libera_claims_vencidos() {
        let state = state();
        state.scheduler.create_job(job(1)).unwrap();
        let a = state.scheduler.claim_next("nodeA").unwrap();

        // timeout cero: cualquier claim ya está vencido
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sweep_once(&state, Duration::ZERO), 1);

        let b = state.scheduler.claim_next("nodeB").unwrap();
        assert_eq!(a.task_id, b.task_id);
    }

    #[test]
    fn sweep_respeta_claims_frescos() {
        let state = state();
        state.scheduler.create_job(job(2)).unwrap();
        state.scheduler.claim_next("nodeA").unwrap();

        assert_eq!(sweep_once(&state, Duration::from_secs(3600)), 0);
        assert_eq!(state.scheduler.active_claims_for("nodeA"), 1);
    }
}
