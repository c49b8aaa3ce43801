mod claims;
mod config;
mod failover;
mod handlers;
mod scheduler;
mod state;
mod store;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::ResultSink;

use crate::config::{MasterConfig, StoreBackend};
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::store::{DocumentStore, FileStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("renderfarm_master=debug,tower_http=info")),
        )
        .init();

    let config = MasterConfig::from_env();
    info!("configuración: {:?}", config);

    let store: Arc<dyn DocumentStore> = match &config.store {
        StoreBackend::Memory => {
            warn!("usando store en memoria: el estado no sobrevive reinicios");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Files(dir) => Arc::new(FileStore::open(dir)?),
    };

    // el estado persistido se carga antes de aceptar nodos
    let (scheduler, report) = Scheduler::load(
        store,
        ResultSink::new(config.result_root.clone()),
        config.claim_policy,
    )?;
    for diagnostic in &report.diagnostics {
        warn!("al cargar estado: {}", diagnostic);
    }

    let state = AppState::new(Arc::new(scheduler));

    // router HTTP
    let app = handlers::build_router(state.clone());

    // sweeper de claims vencidos en segundo plano
    tokio::spawn(failover::run_failover_loop(
        state.clone(),
        config.sweep_interval,
        config.claim_timeout,
    ));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
