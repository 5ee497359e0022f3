pub mod chaos;
pub mod config;
pub mod queue;
pub mod routes;
pub mod seed;
pub mod stream;
pub mod submission;
pub mod workflow;

use autoapply_core::retry::RetryPolicy;
use autoapply_storage::PortalStore;
use chaos::FaultInjector;
use config::{Credentials, PortalConfig};
use queue::QueueBook;
use routes::AppState;
use std::{
    future::Future,
    sync::{Arc, Mutex},
};
use stream::EventHub;
use submission::SubmissionService;
use tokio::net::TcpListener;
use workflow::AutoApplyDriver;

/// Wires the shared services for one portal process around an opened store.
pub fn build_state(config: &PortalConfig, store: PortalStore) -> AppState {
    let submissions = SubmissionService::new(
        Arc::new(Mutex::new(store)),
        Arc::new(FaultInjector::new(config.chaos)),
    );
    let hub = Arc::new(EventHub::new(config.stream.clone()));
    let driver = Arc::new(AutoApplyDriver::new(
        submissions.clone(),
        hub.clone(),
        Arc::new(QueueBook::new()),
        RetryPolicy::default().with_max_attempts(config.max_apply_attempts),
        config.apply_pacing,
    ));
    AppState {
        submissions,
        hub,
        driver,
        credentials: Arc::new(Credentials::new(config.credentials.clone())),
        seed_jobs: config.seed_jobs,
    }
}

/// Serves the portal on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let hub = state.hub.clone();
    let reaper = hub.clone().start_stale_reaper();
    let app = routes::build_router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(reaper) = reaper {
        reaper.abort();
    }
    // Upgraded sockets outlive the HTTP server; close them explicitly.
    let closed = hub.close_all("shutdown").await;
    tracing::info!(event = "streams_closed", count = closed);
    result
}
