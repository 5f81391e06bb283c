//! Job registry: name to handler and tick interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::DbError;
use crate::job::JobHandler;

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn JobHandler>,
    interval: Duration,
}

/// Registered jobs, looked up by name at dispatch time.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, Registration>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::JobAlreadyRegistered`] if the name is taken, and
    /// [`DbError::Config`] for a zero interval.
    pub fn register(
        &self,
        handler: Arc<dyn JobHandler>,
        interval: Duration,
    ) -> Result<(), DbError> {
        if interval.is_zero() {
            return Err(DbError::Config(format!(
                "job '{}' needs a non-zero interval",
                handler.name()
            )));
        }
        let name = handler.name().to_string();
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&name) {
            return Err(DbError::JobAlreadyRegistered(name));
        }
        jobs.insert(name, Registration { handler, interval });
        Ok(())
    }

    /// Removes a job; returns `true` if it was registered.
    pub fn deregister(&self, name: &str) -> bool {
        self.jobs.write().remove(name).is_some()
    }

    /// Handler registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::JobNotFound`] if no such job is registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn JobHandler>, DbError> {
        self.jobs
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| DbError::JobNotFound(name.to_string()))
    }

    /// Tick interval of `name`.
    #[must_use]
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.jobs.read().get(name).map(|r| r.interval)
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().contains_key(name)
    }

    /// Registered job names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns `true` if no job is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::job::TickOutcome;

    struct Noop(&'static str);

    #[async_trait]
    impl JobHandler for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self) -> Result<TickOutcome, DbError> {
            Ok(TickOutcome::Idle)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = JobRegistry::new();
        registry
            .register(Arc::new(Noop("b")), Duration::from_secs(1))
            .unwrap();
        registry
            .register(Arc::new(Noop("a")), Duration::from_secs(2))
            .unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert_eq!(registry.interval("a"), Some(Duration::from_secs(2)));
        assert!(matches!(registry.get("zzz"), Err(DbError::JobNotFound(_))));
    }

    #[test]
    fn test_duplicate_and_zero_interval_rejected() {
        let registry = JobRegistry::new();
        registry
            .register(Arc::new(Noop("a")), Duration::from_secs(1))
            .unwrap();
        assert!(matches!(
            registry.register(Arc::new(Noop("a")), Duration::from_secs(1)),
            Err(DbError::JobAlreadyRegistered(_))
        ));
        assert!(registry
            .register(Arc::new(Noop("z")), Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_deregister() {
        let registry = JobRegistry::new();
        registry
            .register(Arc::new(Noop("a")), Duration::from_secs(1))
            .unwrap();
        assert!(registry.deregister("a"));
        assert!(!registry.deregister("a"));
        assert!(registry.is_empty());
    }
}
