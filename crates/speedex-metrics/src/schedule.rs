//! Background loops for cached mode.
//!
//! - [`run_schedule`] measures at a fixed interval through the coordinator.
//! - [`follow_state_file`] picks up results written by another process
//!   (`speedexd once` under cron or a systemd timer).
//!
//! Both stop when the shutdown channel flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::coordinator::Coordinator;
use crate::persist::StateFile;

/// Measure now, then once per `interval`, until shutdown.
pub async fn run_schedule(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "background speedtest schedule started");

    loop {
        tokio::select! {
            result = coordinator.run_or_join() => {
                debug!(succeeded = result.succeeded(), "scheduled speedtest finished");
            }
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("background speedtest schedule stopped");
}

/// Poll `state` and move newer results into `cache`, until shutdown.
pub async fn follow_state_file(
    state: StateFile,
    cache: Arc<ResultCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(path = %state.path().display(), "following state file");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = load_if_newer(&state, &cache).await {
                    warn!(error = %e, path = %state.path().display(), "failed to read state file");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Seed `cache` from `state`. Returns whether anything was loaded.
pub async fn load_if_newer(
    state: &StateFile,
    cache: &ResultCache,
) -> Result<bool, crate::persist::PersistError> {
    let Some(stored) = state.load().await? else {
        return Ok(false);
    };

    let is_newer = cache
        .read()
        .is_none_or(|current| stored.timestamp > current.timestamp);
    if !is_newer {
        return Ok(false);
    }

    let succeeded = stored.succeeded();
    let written = cache.write(Arc::new(stored));
    if written {
        info!(succeeded, "loaded result from state file");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::UNIX_EPOCH;

    use speedex_core::SpeedtestResult;
    use speedex_runner::{BoxFuture, Measure};

    use super::*;

    struct CountingRunner {
        calls: AtomicUsize,
    }

    impl Measure for CountingRunner {
        fn measure(&self) -> BoxFuture<'_, SpeedtestResult> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                SpeedtestResult::failure("no network")
            })
        }
    }

    fn failure_at(secs: u64) -> SpeedtestResult {
        SpeedtestResult::failure_at(UNIX_EPOCH + Duration::from_secs(secs), format!("at {secs}"))
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_runs_immediately_then_per_interval() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResultCache::new());
        let coordinator = Arc::new(Coordinator::new(runner.clone(), cache.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_schedule(
            coordinator,
            Duration::from_secs(60),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(cache.read().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn load_if_newer_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("last.json"));
        let cache = ResultCache::new();

        assert!(!load_if_newer(&state, &cache).await.unwrap());

        state.save(&failure_at(200)).await.unwrap();
        assert!(load_if_newer(&state, &cache).await.unwrap());
        assert_eq!(cache.read().unwrap().error_message(), Some("at 200"));

        // Same file again: nothing new.
        assert!(!load_if_newer(&state, &cache).await.unwrap());

        state.save(&failure_at(100)).await.unwrap();
        assert!(!load_if_newer(&state, &cache).await.unwrap());
        assert_eq!(cache.read().unwrap().error_message(), Some("at 200"));
    }

    #[tokio::test]
    async fn follower_picks_up_external_results() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("last.json"));
        let cache = Arc::new(ResultCache::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(follow_state_file(
            state.clone(),
            cache.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        state.save(&failure_at(300)).await.unwrap();
        for _ in 0..200 {
            if cache.read().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.read().unwrap().error_message(), Some("at 300"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
