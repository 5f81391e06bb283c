//! Job handlers.
//!
//! A [`JobHandler`] is what the scheduler ticks. [`IncrementalJob`] adapts a
//! [`WindowProcessor`] (business logic for one window) into a handler that
//! computes the window, runs the processor, and commits the processor's
//! writes together with the checkpoint advance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_core::Window;
use strata_storage::UnitOfWork;
use tracing::debug;

use crate::config::JobConfig;
use crate::error::DbError;
use crate::window::WindowCalculator;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do this tick.
    Idle,
    /// Progress was committed up to `to`.
    Advanced {
        /// New checkpoint height.
        to: i64,
        /// Pause requested before the next tick.
        pause: Duration,
    },
    /// The job finished for good and should be deregistered.
    Completed,
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Advanced { to, .. } => write!(f, "advanced to {to}"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A unit of periodic work.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Unique job name.
    fn name(&self) -> &str;

    /// Runs one tick.
    async fn run(&self) -> Result<TickOutcome, DbError>;
}

/// Business logic for one window.
///
/// All writes must go through `uow`; they commit together with the
/// checkpoint advance or not at all.
#[async_trait]
pub trait WindowProcessor: Send + Sync {
    /// Processes `[window.start, window.end)`.
    async fn process(&self, window: Window, uow: &mut dyn UnitOfWork) -> Result<(), DbError>;
}

/// Runs one configured statement per window.
///
/// `{start}` and `{end}` in the template are replaced by the window bounds.
#[derive(Debug, Clone)]
pub struct SqlWindowProcessor {
    template: String,
}

impl SqlWindowProcessor {
    /// Creates a processor for `template`.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The statement for `window`.
    #[must_use]
    pub fn render(&self, window: Window) -> String {
        self.template
            .replace("{start}", &window.start.to_string())
            .replace("{end}", &window.end.to_string())
    }
}

#[async_trait]
impl WindowProcessor for SqlWindowProcessor {
    async fn process(&self, window: Window, uow: &mut dyn UnitOfWork) -> Result<(), DbError> {
        let rows = uow.execute(&self.render(window)).await?;
        debug!(start = window.start, end = window.end, rows, "window statement executed");
        Ok(())
    }
}

/// Windowed, checkpointed job.
pub struct IncrementalJob {
    name: String,
    depends_on: Vec<String>,
    batch: Option<String>,
    calculator: Arc<WindowCalculator>,
    processor: Arc<dyn WindowProcessor>,
}

impl IncrementalJob {
    /// Creates a job.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        depends_on: Vec<String>,
        batch: Option<String>,
        calculator: Arc<WindowCalculator>,
        processor: Arc<dyn WindowProcessor>,
    ) -> Self {
        Self {
            name: name.into(),
            depends_on,
            batch,
            calculator,
            processor,
        }
    }

    /// Creates a job from its `[jobs.<name>]` section.
    #[must_use]
    pub fn from_config(
        name: impl Into<String>,
        config: &JobConfig,
        calculator: Arc<WindowCalculator>,
        processor: Arc<dyn WindowProcessor>,
    ) -> Self {
        Self::new(
            name,
            config.depends_on.clone(),
            config.batch.clone(),
            calculator,
            processor,
        )
    }
}

#[async_trait]
impl JobHandler for IncrementalJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<TickOutcome, DbError> {
        let outcome = self
            .calculator
            .compute_window(&self.name, &self.depends_on, self.batch.as_deref())
            .await?;
        if outcome.window.is_empty() {
            return Ok(TickOutcome::Idle);
        }
        let window = outcome.window;
        let mut checkpoint = outcome.pending;

        let mut uow = self.calculator.store().begin().await?;
        self.processor.process(window, uow.as_mut()).await?;
        checkpoint.advance_to(window.end)?;
        uow.save_checkpoint(&checkpoint).await?;
        uow.commit().await?;

        debug!(job = %self.name, start = window.start, end = window.end, "window committed");
        Ok(TickOutcome::Advanced {
            to: window.end,
            pause: outcome.delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use strata_core::HealthSnapshot;
    use strata_storage::{IndexStore, MemoryStore};

    use super::*;
    use crate::config::{BatchConfig, IndexerConfig};
    use crate::rate_controller::RateController;

    struct Recorder {
        fail: AtomicBool,
    }

    #[async_trait]
    impl WindowProcessor for Recorder {
        async fn process(&self, window: Window, uow: &mut dyn UnitOfWork) -> Result<(), DbError> {
            uow.execute(&format!("INSERT {} {}", window.start, window.end))
                .await?;
            if self.fail.load(Ordering::SeqCst) {
                return Err(DbError::transient("rpc timeout"));
            }
            Ok(())
        }
    }

    fn job(store: &Arc<MemoryStore>, processor: Arc<Recorder>) -> IncrementalJob {
        let mut config = IndexerConfig::default();
        config.batches.insert(
            "b".into(),
            BatchConfig {
                chunk_size: 25,
                min_batch: 1,
                ..BatchConfig::default()
            },
        );
        let rate = Arc::new(RateController::fixed(HealthSnapshot::idle()));
        let calc = Arc::new(WindowCalculator::new(store.clone(), rate, &config));
        IncrementalJob::new(
            "index",
            vec!["crawl-block".into()],
            Some("b".into()),
            calc,
            processor,
        )
    }

    #[tokio::test]
    async fn test_commits_writes_with_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        store.set_checkpoint("crawl-block", 40).await;
        let job = job(
            &store,
            Arc::new(Recorder {
                fail: AtomicBool::new(false),
            }),
        );
        assert_eq!(
            job.run().await.unwrap(),
            TickOutcome::Advanced {
                to: 25,
                pause: Duration::ZERO
            }
        );
        assert_eq!(
            job.run().await.unwrap(),
            TickOutcome::Advanced {
                to: 40,
                pause: Duration::ZERO
            }
        );
        assert_eq!(job.run().await.unwrap(), TickOutcome::Idle);
        assert_eq!(store.statements().await, vec!["INSERT 0 25", "INSERT 25 40"]);
        assert_eq!(store.load_checkpoint("index").await.unwrap().unwrap().height, 40);
    }

    #[tokio::test]
    async fn test_processor_failure_advances_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_checkpoint("crawl-block", 40).await;
        let processor = Arc::new(Recorder {
            fail: AtomicBool::new(true),
        });
        let job = job(&store, processor.clone());
        assert!(job.run().await.is_err());
        assert!(store.statements().await.is_empty());
        assert!(store.load_checkpoint("index").await.unwrap().is_none());

        processor.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            job.run().await.unwrap(),
            TickOutcome::Advanced { to: 25, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_commit_retries_same_window() {
        let store = Arc::new(MemoryStore::new());
        store.set_checkpoint("crawl-block", 10).await;
        let job = job(
            &store,
            Arc::new(Recorder {
                fail: AtomicBool::new(false),
            }),
        );
        store.fail_next_commit().await;
        assert_eq!(
            job.run().await.unwrap_err().class(),
            strata_storage::ErrorClass::Transient
        );
        assert!(matches!(
            job.run().await.unwrap(),
            TickOutcome::Advanced { to: 10, .. }
        ));
        assert_eq!(store.statements().await, vec!["INSERT 0 10"]);
    }

    #[test]
    fn test_sql_template_rendering() {
        let processor =
            SqlWindowProcessor::new("DELETE FROM t WHERE height >= {start} AND height < {end}");
        assert_eq!(
            processor.render(Window::new(5, 9)),
            "DELETE FROM t WHERE height >= 5 AND height < 9"
        );
    }
}
