//! Adaptive rate controller.
//!
//! Samples database health through a [`HealthProbe`], caches the sample for
//! a short TTL, and turns it into a batch size and delay with a
//! [`RatePolicy`]. A failed probe never fails the caller: the last good
//! sample is reused, or a fully loaded one is assumed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_core::{HealthSnapshot, RatePlan, RatePolicy};
use strata_storage::IndexStore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::DbError;

/// Source of [`HealthSnapshot`]s.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Takes a fresh sample.
    async fn sample(&self) -> Result<HealthSnapshot, DbError>;
}

/// Probe reading connection usage and a sentinel table from the store.
///
/// The database counts as a fresh start while the sentinel table is empty.
/// Without a sentinel table it never does.
pub struct StoreHealthProbe {
    store: Arc<dyn IndexStore>,
    sentinel_table: Option<String>,
}

impl StoreHealthProbe {
    /// Creates a probe.
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>, sentinel_table: Option<String>) -> Self {
        Self {
            store,
            sentinel_table,
        }
    }
}

#[async_trait]
impl HealthProbe for StoreHealthProbe {
    async fn sample(&self) -> Result<HealthSnapshot, DbError> {
        let activity = self.store.activity().await?;
        let fresh_start = match &self.sentinel_table {
            Some(table) => self.store.max_id(table).await?.is_none(),
            None => false,
        };
        Ok(HealthSnapshot {
            load: activity.load(),
            fresh_start,
        })
    }
}

/// Probe returning a fixed snapshot.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub HealthSnapshot);

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn sample(&self) -> Result<HealthSnapshot, DbError> {
        Ok(self.0)
    }
}

struct CachedSample {
    taken_at: Instant,
    snapshot: HealthSnapshot,
}

/// Cached health signal plus batch planning.
pub struct RateController {
    probe: Arc<dyn HealthProbe>,
    ttl: Duration,
    cached: Mutex<Option<CachedSample>>,
}

impl RateController {
    /// Creates a controller caching samples for `ttl`.
    #[must_use]
    pub fn new(probe: Arc<dyn HealthProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Controller that always reports `snapshot`.
    #[must_use]
    pub fn fixed(snapshot: HealthSnapshot) -> Self {
        Self::new(Arc::new(StaticProbe(snapshot)), Duration::ZERO)
    }

    /// Current health, from cache when the last sample is younger than the TTL.
    pub async fn health(&self) -> HealthSnapshot {
        let stale = {
            let cached = self.cached.lock();
            match cached.as_ref() {
                Some(sample) if sample.taken_at.elapsed() < self.ttl => {
                    return sample.snapshot;
                }
                Some(sample) => Some(sample.snapshot),
                None => None,
            }
        };
        match self.probe.sample().await {
            Ok(snapshot) => {
                debug!(load = snapshot.load, mode = %snapshot.mode(), "health sampled");
                *self.cached.lock() = Some(CachedSample {
                    taken_at: Instant::now(),
                    snapshot,
                });
                snapshot
            }
            Err(err) => {
                warn!(error = %err, "health probe failed, assuming high load");
                stale.unwrap_or(HealthSnapshot {
                    load: 1.0,
                    fresh_start: false,
                })
            }
        }
    }

    /// Batch size and delay for `policy` under the current health.
    pub async fn plan(&self, policy: &RatePolicy) -> RatePlan {
        let health = self.health().await;
        policy.plan(&health)
    }
}
