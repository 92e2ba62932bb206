use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::retention::store::RecordStore;
use crate::retention::{saturating_before, zeroed_counts, Category, RetentionPolicy, WarningWindows};
use crate::schedule::{Cadence, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_by_category: BTreeMap<Category, usize>,
    pub total_deleted: usize,
    pub success: bool,
    pub error: Option<String>,
    pub ran_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CleanupReport {
    fn failed(ran_at: DateTime<Utc>, error: String, duration_ms: u64) -> Self {
        Self {
            deleted_by_category: zeroed_counts(),
            total_deleted: 0,
            success: false,
            error: Some(error),
            ran_at,
            duration_ms,
        }
    }

    pub fn summary(&self) -> String {
        let per_category = self
            .deleted_by_category
            .iter()
            .map(|(category, count)| format!("{}: {}", category, count))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} records deleted ({})", self.total_deleted, per_category)
    }
}

// Flips the running flag back on drop, including when a run is cancelled.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ServiceInner {
    store: Arc<dyn RecordStore>,
    policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    last_report: Mutex<Option<CleanupReport>>,
}

impl ServiceInner {
    async fn run(&self, now: DateTime<Utc>) -> CleanupReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Retention cleanup requested while a run is in progress");
            return CleanupReport::failed(now, "cleanup already running".to_string(), 0);
        }
        let _guard = RunGuard(&self.running);

        let started = tokio::time::Instant::now();
        let cutoffs = self.policy.cutoffs(now);
        let result = self.store.purge(&cutoffs).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let report = match result {
            Ok(deleted_by_category) => {
                let report = CleanupReport {
                    total_deleted: deleted_by_category.values().sum(),
                    deleted_by_category,
                    success: true,
                    error: None,
                    ran_at: now,
                    duration_ms,
                };
                info!("Retention cleanup finished in {}ms: {}", duration_ms, report.summary());
                report
            }
            Err(e) => {
                error!("Retention cleanup failed: {}", e);
                CleanupReport::failed(now, e.to_string(), duration_ms)
            }
        };

        *self.last_report.lock() = Some(report.clone());
        report
    }
}

/// Deletes saved items that outlived their category's retention window.
pub struct RetentionCleanupService {
    inner: Arc<ServiceInner>,
    scheduler: Scheduler,
}

impl RetentionCleanupService {
    pub fn new(store: Arc<dyn RecordStore>, policy: RetentionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler: Scheduler::new("retention cleanup", Arc::clone(&clock)),
            inner: Arc::new(ServiceInner {
                store,
                policy,
                clock,
                running: AtomicBool::new(false),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.inner.policy
    }

    /// Never fails; problems are reported with `success: false`.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        self.inner.run(now).await
    }

    pub async fn trigger_manual(&self) -> CleanupReport {
        info!("Manual retention cleanup triggered");
        self.inner.run(self.inner.clock.now()).await
    }

    /// Counts, per category, of records that will be deleted within the
    /// category's warning window but are not yet due.
    pub async fn get_expiring_soon(
        &self,
        now: DateTime<Utc>,
        warnings: &WarningWindows,
    ) -> Result<BTreeMap<Category, usize>> {
        let mut counts = BTreeMap::new();
        for category in Category::ALL {
            let retention = self.inner.policy.window(category);
            let cutoff = saturating_before(now, retention);
            let until = saturating_before(now, retention - warnings.window(category));
            let count = self.inner.store.count_saved_between(category, cutoff, until).await?;
            counts.insert(category, count);
        }
        Ok(counts)
    }

    pub async fn expiring_soon(&self, now: DateTime<Utc>) -> Result<BTreeMap<Category, usize>> {
        let warnings = self.inner.policy.warnings().clone();
        self.get_expiring_soon(now, &warnings).await
    }

    /// Run every day at `daily_time`, server local time per the service clock.
    pub fn schedule(&self, daily_time: NaiveTime) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.scheduler.start(Cadence::DailyAt(daily_time), move || {
            let inner = Arc::clone(&inner);
            async move {
                let now = inner.clock.now();
                inner.run(now).await;
            }
        })
    }

    pub fn stop_schedule(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn state(&self) -> CleanupState {
        if self.inner.running.load(Ordering::SeqCst) {
            CleanupState::Running
        } else {
            CleanupState::Idle
        }
    }

    pub fn last_report(&self) -> Option<CleanupReport> {
        self.inner.last_report.lock().clone()
    }
}
