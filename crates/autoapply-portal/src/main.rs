use anyhow::Context;
use autoapply_core::logging::init_logging;
use autoapply_portal::{build_state, config::load_config, seed, serve};
use autoapply_storage::PortalStore;
use std::path::Path;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config.log_settings());
    if let Err(err) = run(config).await {
        error!(event = "portal_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: autoapply_portal::config::PortalConfig) -> anyhow::Result<()> {
    let store = open_store(&config.db_path)?;
    let state = build_state(&config, store);

    if state.submissions.job_count()? == 0 {
        seed::reseed(&state.submissions, config.seed_jobs)?;
    }

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!(
        event = "portal_start",
        addr = %listener.local_addr()?,
        db = %config.db_path,
        chaos = config.chaos.enabled,
        failure_rate = %config.chaos.rate_label(),
        credentials = state.credentials.len()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "portal_shutdown");
    };
    serve(listener, state, shutdown).await?;
    Ok(())
}

fn open_store(db_path: &str) -> anyhow::Result<PortalStore> {
    if db_path == ":memory:" {
        return Ok(PortalStore::open_in_memory()?);
    }
    let path = Path::new(db_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    PortalStore::open(path).with_context(|| format!("opening {}", path.display()))
}
