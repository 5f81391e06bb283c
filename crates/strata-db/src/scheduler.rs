//! Job scheduler.
//!
//! Owns one single-flight ticker per registered job. A tick always runs to
//! completion before the next one is awaited, missed ticks are delayed
//! rather than bursted, and every ticker stops when the scheduler's
//! [`CancellationToken`] fires. Failures are isolated per job: the error
//! class decides the log level and whether the ticker backs off.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_storage::ErrorClass;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DbError;
use crate::job::TickOutcome;
use crate::metrics::{now_ms, MetricsRegistry};
use crate::registry::JobRegistry;

/// Looks a job up and runs one tick of it, recording metrics.
#[derive(Clone)]
struct Dispatcher {
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    async fn run_once(&self, name: &str) -> Result<TickOutcome, DbError> {
        let handler = self.registry.get(name)?;
        let metrics = self.metrics.job(name);
        match handler.run().await {
            Ok(outcome) => {
                metrics.record_outcome(&outcome, now_ms());
                match outcome {
                    TickOutcome::Completed => {
                        self.registry.deregister(name);
                        info!(job = name, "job completed, deregistered");
                    }
                    TickOutcome::Advanced { to, .. } => {
                        debug!(job = name, height = to, "tick advanced");
                    }
                    TickOutcome::Idle => {}
                }
                Ok(outcome)
            }
            Err(err) => {
                let class = err.class();
                metrics.record_failure(class);
                match class {
                    ErrorClass::Transient => {
                        warn!(job = name, error = %err, "transient failure, retrying after backoff");
                    }
                    ErrorClass::Integrity => {
                        warn!(job = name, error = %err, "integrity conflict, treated as done");
                    }
                    ErrorClass::Contract => {
                        error!(job = name, error = %err, "tick aborted");
                    }
                }
                Err(err)
            }
        }
    }
}

/// Sleeps for `duration`; returns `false` if cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

async fn job_loop(
    dispatcher: Dispatcher,
    name: String,
    period: Duration,
    transient_backoff: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let resume = match dispatcher.run_once(&name).await {
            Ok(TickOutcome::Completed) | Err(DbError::JobNotFound(_)) => break,
            Ok(TickOutcome::Advanced { pause: delay, .. }) if !delay.is_zero() => {
                pause(&cancel, delay).await
            }
            Ok(_) => true,
            Err(err) if err.class() == ErrorClass::Transient => {
                pause(&cancel, transient_backoff).await
            }
            Err(_) => true,
        };
        if !resume {
            break;
        }
    }
    debug!(job = %name, "ticker stopped");
}

/// Runs registered jobs on their intervals until shut down.
pub struct Scheduler {
    dispatcher: Dispatcher,
    transient_backoff: Duration,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl Scheduler {
    /// Creates a scheduler over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsRegistry>,
        transient_backoff: Duration,
    ) -> Self {
        Self {
            dispatcher: Dispatcher { registry, metrics },
            transient_backoff,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// The job registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.dispatcher.registry
    }

    /// Per-job metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.dispatcher.metrics
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns a ticker for every registered job.
    pub fn start(&self) {
        let names = self.dispatcher.registry.names();
        info!(jobs = names.len(), "starting scheduler");
        for name in names {
            self.spawn(&name);
        }
    }

    /// Spawns a ticker for one job; returns `false` if it is not registered.
    pub fn spawn(&self, name: &str) -> bool {
        let Some(period) = self.dispatcher.registry.interval(name) else {
            return false;
        };
        // Registered before the first tick so a never-succeeding job still
        // shows up as stalled.
        self.dispatcher.metrics.job(name);
        self.tasks.lock().spawn(job_loop(
            self.dispatcher.clone(),
            name.to_string(),
            period,
            self.transient_backoff,
            self.cancel.child_token(),
        ));
        true
    }

    /// Runs one tick of `name` outside its ticker.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::JobNotFound`] for an unknown job, or the tick's error.
    pub async fn run_once(&self, name: &str) -> Result<TickOutcome, DbError> {
        self.dispatcher.run_once(name).await
    }

    /// Stops every ticker and waits for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    error!(error = %err, "job task panicked");
                }
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::job::JobHandler;

    struct Scripted {
        name: &'static str,
        runs: AtomicU64,
        script: fn(u64) -> Result<TickOutcome, DbError>,
    }

    #[async_trait]
    impl JobHandler for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<TickOutcome, DbError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            (self.script)(n)
        }
    }

    fn scheduler(jobs: Vec<Arc<Scripted>>) -> Scheduler {
        let registry = Arc::new(JobRegistry::new());
        for job in jobs {
            registry.register(job, Duration::from_secs(1)).unwrap();
        }
        Scheduler::new(
            registry,
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_job_is_deregistered() {
        let job = Arc::new(Scripted {
            name: "migrate",
            runs: AtomicU64::new(0),
            script: |n| {
                Ok(if n == 0 {
                    TickOutcome::Idle
                } else {
                    TickOutcome::Completed
                })
            },
        });
        let scheduler = scheduler(vec![job.clone()]);
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!scheduler.registry().contains("migrate"));
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_backs_off_and_retries() {
        let job = Arc::new(Scripted {
            name: "index",
            runs: AtomicU64::new(0),
            script: |n| {
                if n == 0 {
                    Err(DbError::transient("lock timeout"))
                } else {
                    Ok(TickOutcome::Advanced {
                        to: i64::try_from(n).unwrap_or_default(),
                        pause: Duration::ZERO,
                    })
                }
            },
        });
        let scheduler = scheduler(vec![job.clone()]);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = scheduler.metrics().snapshot()["index"].clone();
        assert_eq!(snap.transient_failures, 1);
        assert!(snap.advanced >= 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_does_not_stop_others() {
        let broken = Arc::new(Scripted {
            name: "broken",
            runs: AtomicU64::new(0),
            script: |_| Err(DbError::Config("missing".into())),
        });
        let healthy = Arc::new(Scripted {
            name: "healthy",
            runs: AtomicU64::new(0),
            script: |_| Ok(TickOutcome::Idle),
        });
        let scheduler = scheduler(vec![broken.clone(), healthy.clone()]);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(broken.runs.load(Ordering::SeqCst), 5);
        assert_eq!(healthy.runs.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.metrics().snapshot()["broken"].contract_failures, 5);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_once_unknown_job() {
        let scheduler = scheduler(Vec::new());
        assert!(matches!(
            scheduler.run_once("nope").await,
            Err(DbError::JobNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_tickers() {
        let job = Arc::new(Scripted {
            name: "idle",
            runs: AtomicU64::new(0),
            script: |_| Ok(TickOutcome::Idle),
        });
        let scheduler = scheduler(vec![job.clone()]);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        scheduler.shutdown().await;
        let runs = job.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), runs);
    }
}
