//! Keeps the cache warm in the background.
//!
//! Refresh cycles are single-flight: whoever asks while a cycle is running
//! joins it instead of starting another. Every completed cycle is broadcast
//! as a [`RefreshUpdate`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::feed::digest;
use crate::feed::pipeline::{FetchPipeline, Mode, Origin, Retrieval};
use crate::schedule::{Cadence, Scheduler};

const UPDATE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshUpdate {
    pub cycle: u64,
    pub origin: Origin,
    pub item_count: usize,
    /// Changes only when the set of item ids changes.
    pub digest: String,
    pub completed_at: DateTime<Utc>,
}

type CycleFuture = Shared<BoxFuture<'static, Retrieval>>;

struct InFlight {
    id: u64,
    /// Number of forced clears seen when the cycle started.
    generation: u64,
    future: CycleFuture,
}

struct Inner {
    pipeline: Arc<FetchPipeline>,
    clock: Arc<dyn Clock>,
    updates: broadcast::Sender<RefreshUpdate>,
    in_flight: Mutex<Option<InFlight>>,
    cycles: AtomicU64,
    clears: AtomicU64,
}

impl Inner {
    fn join_or_start(self: &Arc<Self>) -> (u64, CycleFuture) {
        let mut slot = self.in_flight.lock();
        if let Some(current) = slot.as_ref() {
            debug!("Joining in-flight refresh cycle {}", current.id);
            return (current.generation, current.future.clone());
        }

        let id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.clears.load(Ordering::SeqCst);
        // The slot owns this future, so it must not keep `Inner` alive.
        let pipeline = Arc::clone(&self.pipeline);
        let clock = Arc::clone(&self.clock);
        let owner = Arc::downgrade(self);
        let future = async move {
            let result = pipeline.retrieve_with(clock.now(), Mode::ForceNetwork).await;
            if let Some(inner) = owner.upgrade() {
                inner.finish(id, &result);
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            generation,
            future: future.clone(),
        });
        (generation, future)
    }

    fn finish(&self, id: u64, result: &Retrieval) {
        {
            let mut slot = self.in_flight.lock();
            if slot.as_ref().is_some_and(|current| current.id == id) {
                *slot = None;
            }
        }

        let update = RefreshUpdate {
            cycle: id,
            origin: result.origin,
            item_count: result.items.len(),
            digest: digest(&result.items),
            completed_at: self.clock.now(),
        };
        info!(
            "Refresh cycle {} finished: {} items ({:?})",
            id, update.item_count, update.origin
        );
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

pub struct BackgroundRefresher {
    inner: Arc<Inner>,
    scheduler: Scheduler,
}

impl BackgroundRefresher {
    pub fn new(pipeline: Arc<FetchPipeline>, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            scheduler: Scheduler::new("background refresh", Arc::clone(&clock)),
            inner: Arc::new(Inner {
                pipeline,
                clock,
                updates,
                in_flight: Mutex::new(None),
                cycles: AtomicU64::new(0),
                clears: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh now, then every `interval`.
    pub fn start(&self, interval: Duration) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.scheduler.start(Cadence::Every(interval), move || {
            let (_, cycle) = inner.join_or_start();
            async move {
                cycle.await;
            }
        })
    }

    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub async fn trigger_now(&self) -> Retrieval {
        let (_, cycle) = self.inner.join_or_start();
        cycle.await
    }

    /// Clear the cache and wait for a cycle that started after the clear.
    pub async fn force_refresh(&self) -> Retrieval {
        let generation = self.inner.clears.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.pipeline.cache().clear().await;

        loop {
            let (started_at, cycle) = self.inner.join_or_start();
            let result = cycle.await;
            if started_at >= generation {
                return result;
            }
            debug!("Joined a refresh cycle from before the clear, running another");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }
}
