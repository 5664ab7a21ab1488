//! `speedexd serve`: the long-running exporter.
//!
//! 1. Builds runner, cache and coordinator
//! 2. Seeds the cache from the state file, if configured
//! 3. In cached mode, starts the schedule and state-file loops
//! 4. Serves the API until Ctrl-C or SIGTERM

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use speedex_core::{ScrapeMode, Settings};
use speedex_metrics::{
    Coordinator, ResultCache, ScrapeOrchestrator, StateFile, follow_state_file, load_if_newer,
    run_schedule,
};
use speedex_runner::SpeedtestRunner;

pub async fn run_serve(settings: Settings) -> anyhow::Result<()> {
    info!(
        mode = %settings.mode,
        binary = %settings.tool.binary.display(),
        server_id = settings.tool.server_id.as_deref().unwrap_or("auto"),
        timeout_secs = settings.tool.timeout.as_secs(),
        "speedex exporter starting"
    );

    // ── Core ───────────────────────────────────────────────────

    let runner = Arc::new(SpeedtestRunner::new(settings.tool.clone()));
    let cache = Arc::new(ResultCache::new());
    let state_file = settings.state_path.clone().map(StateFile::new);

    let mut coordinator = Coordinator::new(runner, Arc::clone(&cache));
    if let Some(state) = &state_file {
        match load_if_newer(state, &cache).await {
            Ok(true) => info!(path = %state.path().display(), "cache seeded from state file"),
            Ok(false) => {}
            Err(e) => warn!(
                error = %e,
                path = %state.path().display(),
                "ignoring unreadable state file"
            ),
        }
        coordinator = coordinator.with_state_file(state.clone());
    }
    let coordinator = Arc::new(coordinator);
    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        settings.mode,
        Arc::clone(&coordinator),
    ));

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    match settings.mode {
        ScrapeMode::Cached => {
            if let Some(interval) = settings.schedule {
                background.push(tokio::spawn(run_schedule(
                    Arc::clone(&coordinator),
                    interval,
                    shutdown_rx.clone(),
                )));
            }
            if let Some(state) = state_file {
                background.push(tokio::spawn(follow_state_file(
                    state,
                    Arc::clone(&cache),
                    settings.state_poll_interval,
                    shutdown_rx.clone(),
                )));
            }
            if background.is_empty() {
                warn!(
                    "cached mode without a schedule or state file, scrapes will report no result"
                );
            }
        }
        ScrapeMode::OnDemand => {
            if settings.schedule.is_some() {
                warn!("schedule is only used in cached mode, ignoring it");
            }
        }
    }

    // ── API server ─────────────────────────────────────────────

    let router = speedex_api::build_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, "metrics endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in background {
        let _ = handle.await;
    }

    info!("speedex exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
