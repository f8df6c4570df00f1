//! Removal of expired entries.
//!
//! Reads never return expired rows, but nothing deletes them either. A
//! [`CleanupSweep`] is the only way they leave the table: run on demand
//! (with a dry-run mode and a confirmation gate) or periodically through
//! [`spawn_auto_cleanup`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::StorageResult;
use crate::model::Entry;
use crate::store::{EntryFilter, EntryQuery, EntryStore, NamespaceFilter, OwnerFilter};

/// Number of rows a dry run reports by default.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// What a sweep should touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    /// Report instead of deleting.
    pub dry_run: bool,
    /// Only rows in this namespace.
    pub namespace: Option<String>,
    /// Only rows whose owner is of this kind.
    pub owner_type: Option<String>,
    /// Rows listed by a dry run.
    pub sample_size: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            namespace: None,
            owner_type: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

impl SweepOptions {
    fn filter(&self) -> EntryFilter {
        let mut filter = EntryFilter::all().expired();
        if let Some(namespace) = &self.namespace {
            filter.namespace = NamespaceFilter::Equals(namespace.clone());
        }
        if let Some(kind) = &self.owner_type {
            filter.owner = OwnerFilter::OwnerType(kind.clone());
        }
        filter
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    /// No expired rows matched.
    NothingToDo,
    /// Dry run: `count` rows would be deleted; `sample` shows a few.
    DryRun {
        /// Matching rows.
        count: u64,
        /// Up to `sample_size` of them, oldest id first.
        sample: Vec<Entry>,
    },
    /// The confirmation gate declined.
    Cancelled {
        /// Matching rows, left in place.
        count: u64,
    },
    /// Rows were deleted.
    Deleted {
        /// Rows removed.
        count: u64,
    },
}

/// Deletes expired rows from an entry table.
#[derive(Clone)]
pub struct CleanupSweep {
    store: Arc<dyn EntryStore>,
}

impl std::fmt::Debug for CleanupSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupSweep").finish_non_exhaustive()
    }
}

impl CleanupSweep {
    /// Create a sweep over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// Count, report or delete expired rows.
    ///
    /// `confirm` receives the number of matching rows and decides whether
    /// they are deleted. It is not called for dry runs or when nothing
    /// matches.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn run<F>(&self, options: &SweepOptions, confirm: F) -> StorageResult<SweepOutcome>
    where
        F: FnOnce(u64) -> bool,
    {
        let filter = options.filter();
        let count = self.store.count(&filter).await?;
        if count == 0 {
            debug!("No expired entries found");
            return Ok(SweepOutcome::NothingToDo);
        }

        if options.dry_run {
            let sample = self
                .store
                .select(&EntryQuery {
                    limit: Some(options.sample_size),
                    ..EntryQuery::new(filter)
                })
                .await?;
            return Ok(SweepOutcome::DryRun { count, sample });
        }

        if !confirm(count) {
            info!(count, "Cleanup cancelled");
            return Ok(SweepOutcome::Cancelled { count });
        }

        let deleted = self.store.delete(&filter).await?;
        info!(deleted, "Expired entries deleted");
        Ok(SweepOutcome::Deleted { count: deleted })
    }

    /// Delete every expired row without confirmation.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn purge(&self) -> StorageResult<u64> {
        match self.run(&SweepOptions::default(), |_| true).await? {
            SweepOutcome::Deleted { count } => Ok(count),
            _ => Ok(0),
        }
    }
}

/// Spawn a task that purges expired rows every `interval`.
///
/// The first sweep runs immediately. Failures are logged and retried on the
/// next tick. Abort the returned handle to stop the loop.
#[must_use]
pub fn spawn_auto_cleanup(
    store: Arc<dyn EntryStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let sweep = CleanupSweep::new(store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep.purge().await {
                Ok(0) => {},
                Ok(count) => info!(count, "Auto cleanup removed expired entries"),
                Err(e) => warn!(error = %e, "Auto cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryWrite, OwnerRef, Scope};
    use crate::store::MemoryEntryStore;
    use chrono::{TimeDelta, Utc};
    use serde_json::json;

    async fn seeded() -> Arc<MemoryEntryStore> {
        let store = Arc::new(MemoryEntryStore::new());
        let past = Utc::now() - TimeDelta::seconds(10);
        let future = Utc::now() + TimeDelta::hours(1);
        let rows = [
            (None, None, "a", Some(past)),
            (None, Some("cache"), "b", Some(past)),
            (Some(OwnerRef::user(1)), Some("cache"), "c", Some(past)),
            (Some(OwnerRef::team(1)), None, "d", Some(past)),
            (None, None, "live", Some(future)),
            (None, None, "forever", None),
        ];
        for (owner, ns, key, expires_at) in rows {
            store
                .upsert(EntryWrite {
                    scope: Scope::new(owner, ns.map(str::to_owned)),
                    key: key.into(),
                    value: json!(key),
                    expires_at,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let store = seeded().await;
        let sweep = CleanupSweep::new(store.clone());
        let options = SweepOptions {
            dry_run: true,
            sample_size: 2,
            ..SweepOptions::default()
        };
        let outcome = sweep
            .run(&options, |_| panic!("dry run must not ask"))
            .await
            .unwrap();
        match outcome {
            SweepOutcome::DryRun { count, sample } => {
                assert_eq!(count, 4);
                assert_eq!(sample.len(), 2);
                assert_eq!(sample[0].key, "a");
            },
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.len().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_confirmation_gate() {
        let store = seeded().await;
        let sweep = CleanupSweep::new(store.clone());

        let cancelled = sweep.run(&SweepOptions::default(), |_| false).await.unwrap();
        assert_eq!(cancelled, SweepOutcome::Cancelled { count: 4 });
        assert_eq!(store.len().unwrap(), 6);

        let mut asked = 0;
        let deleted = sweep
            .run(&SweepOptions::default(), |n| {
                asked = n;
                true
            })
            .await
            .unwrap();
        assert_eq!(asked, 4);
        assert_eq!(deleted, SweepOutcome::Deleted { count: 4 });
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_filters_by_namespace_and_owner_type() {
        let store = seeded().await;
        let sweep = CleanupSweep::new(store.clone());

        let by_namespace = SweepOptions {
            namespace: Some("cache".into()),
            ..SweepOptions::default()
        };
        assert_eq!(
            sweep.run(&by_namespace, |_| true).await.unwrap(),
            SweepOutcome::Deleted { count: 2 }
        );

        let by_type = SweepOptions {
            owner_type: Some("team".into()),
            ..SweepOptions::default()
        };
        assert_eq!(
            sweep.run(&by_type, |_| true).await.unwrap(),
            SweepOutcome::Deleted { count: 1 }
        );
        assert_eq!(store.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let store = Arc::new(MemoryEntryStore::new());
        let sweep = CleanupSweep::new(store);
        assert_eq!(
            sweep.run(&SweepOptions::default(), |_| true).await.unwrap(),
            SweepOutcome::NothingToDo
        );
        assert_eq!(sweep.purge().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_cleanup_purges() {
        let store = seeded().await;
        let handle = spawn_auto_cleanup(store.clone(), Duration::from_secs(3600));
        for _ in 0..50 {
            if store.len().unwrap() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.len().unwrap(), 2);
    }
}
