//! Single-flight measurement coordinator.
//!
//! At most one measurement runs at a time. A caller arriving while one is
//! in flight subscribes to that attempt's `watch` channel and gets the same
//! `Arc<SpeedtestResult>` as everyone else, so the number of tool
//! invocations tracks non-overlapping attempts, never callers.
//!
//! The attempt runs in its own task. Callers that give up early (a scrape
//! whose client disconnected) do not cancel it.
//!
//! With a state file configured the flight also spans processes: the
//! attempt holds the state file's lock while measuring, and an attempt
//! that had to wait for that lock takes the result stored meanwhile
//! instead of running the tool again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use speedex_core::SpeedtestResult;
use speedex_runner::Measure;

use crate::cache::ResultCache;
use crate::persist::StateFile;

type Flight = watch::Receiver<Option<Arc<SpeedtestResult>>>;

/// Serializes measurements and fans each result out to every waiter.
pub struct Coordinator {
    runner: Arc<dyn Measure>,
    cache: Arc<ResultCache>,
    state_file: Option<StateFile>,
    /// Receiver for the attempt in flight, if any.
    in_flight: Mutex<Option<Flight>>,
    attempts: AtomicU64,
}

impl Coordinator {
    pub fn new(runner: Arc<dyn Measure>, cache: Arc<ResultCache>) -> Self {
        Self {
            runner,
            cache,
            state_file: None,
            in_flight: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Also persist every completed result to `state_file`.
    pub fn with_state_file(mut self, state_file: StateFile) -> Self {
        self.state_file = Some(state_file);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Number of measurements started since construction.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.lock_in_flight().is_some()
    }

    /// Start a measurement, or wait for the one already running.
    ///
    /// Never fails: every path ends in a result, and the cache has been
    /// updated with it before this returns.
    pub async fn run_or_join(self: &Arc<Self>) -> Arc<SpeedtestResult> {
        let mut flight = self.join_or_start();

        let delivered = flight
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| (*slot).clone());

        delivered.unwrap_or_else(|| {
            error!("measurement attempt ended without delivering a result");
            Arc::new(SpeedtestResult::failure("measurement attempt aborted"))
        })
    }

    fn join_or_start(self: &Arc<Self>) -> Flight {
        let mut slot = self.lock_in_flight();

        if let Some(flight) = slot.as_ref() {
            // A closed channel means the attempt task died; start over.
            if flight.has_changed().is_ok() {
                debug!("measurement already in flight, joining it");
                return flight.clone();
            }
            warn!("discarding abandoned measurement attempt");
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_attempt(attempt, tx).await;
        });
        rx
    }

    async fn run_attempt(&self, attempt: u64, tx: watch::Sender<Option<Arc<SpeedtestResult>>>) {
        info!(attempt, "measurement started");
        let requested_at = SystemTime::now();

        // Other processes sharing the state file measure under the same lock.
        let flight_lock = match &self.state_file {
            Some(state) => match state.lock().await {
                Ok(lock) => Some(lock),
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %state.path().display(),
                        "cannot lock state file, measuring anyway"
                    );
                    None
                }
            },
            None => None,
        };

        let joined = match (&flight_lock, &self.state_file) {
            (Some(_), Some(state)) => self.completed_elsewhere(state, requested_at).await,
            _ => None,
        };

        let result = match joined {
            Some(result) => {
                info!(attempt, "joined a measurement finished by another process");
                Arc::new(result)
            }
            None => {
                let result = Arc::new(self.measure(attempt).await);
                if let Some(state) = &self.state_file {
                    if let Err(e) = state.save(&result).await {
                        warn!(
                            error = %e,
                            path = %state.path().display(),
                            "failed to persist result"
                        );
                    }
                }
                result
            }
        };
        drop(flight_lock);

        self.cache.write(Arc::clone(&result));

        // Clear before publishing so the next caller starts a fresh attempt.
        self.lock_in_flight().take();
        tx.send_replace(Some(result.clone()));

        info!(attempt, succeeded = result.succeeded(), "measurement finished");
    }

    async fn measure(&self, attempt: u64) -> SpeedtestResult {
        // A panicking runner still yields a result for the waiters.
        let runner = Arc::clone(&self.runner);
        match tokio::spawn(async move { runner.measure().await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(attempt, error = %e, "measurement task failed");
                SpeedtestResult::failure(format!("measurement task failed: {e}"))
            }
        }
    }

    /// A result another process stored while this one waited for the lock.
    async fn completed_elsewhere(
        &self,
        state: &StateFile,
        requested_at: SystemTime,
    ) -> Option<SpeedtestResult> {
        match state.load().await {
            Ok(Some(stored)) if stored.timestamp >= requested_at => Some(stored),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %state.path().display(),
                    "ignoring unreadable state file"
                );
                None
            }
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<Flight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
