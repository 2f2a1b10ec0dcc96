//! Request deduplication and the completed-result cache.
//!
//! Identical concurrent requests (same [`RequestKey`]) collapse onto one
//! computation: the first caller becomes the leader and spawns the driver
//! task, everyone else subscribes to its broadcast. The driver publishes
//! the settled entry under the table lock before broadcasting, so a caller
//! that arrives between completion and broadcast still observes exactly
//! one delivery. Settled entries linger for a short grace period to absorb
//! near-simultaneous duplicates, then only the bounded TTL cache answers.
//!
//! Failures are broadcast to every collapsed waiter but never cached; the
//! next request with that key computes fresh.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::DedupConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::types::{AnalysisOutcome, RequestKey};

/// Completed outcome shared by every collapsed waiter.
pub type SharedOutcome = Arc<AnalysisOutcome>;

type Settled = Result<SharedOutcome, BrokerError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Entry {
    Running(broadcast::Sender<Settled>),
    /// Settled outcome plus when it settled; only answers within the grace
    /// window even if the removal task has not run yet.
    Done(Settled, Instant),
}

enum Role {
    Leader(broadcast::Sender<Settled>, broadcast::Receiver<Settled>),
    Follower(broadcast::Receiver<Settled>),
    Settled(Settled),
}

struct Inner {
    cfg: DedupConfig,
    inflight: Mutex<HashMap<RequestKey, Entry>>,
    cache: Mutex<ResultCache>,
}

/// Collapses identical in-flight requests and caches completed results.
#[derive(Clone)]
pub struct Deduplicator {
    inner: Arc<Inner>,
}

impl Deduplicator {
    pub fn new(cfg: DedupConfig) -> Self {
        let cache = ResultCache::new(cfg.cache_capacity, Duration::from_secs(cfg.cache_ttl_secs));
        Self {
            inner: Arc::new(Inner {
                cfg,
                inflight: Mutex::new(HashMap::new()),
                cache: Mutex::new(cache),
            }),
        }
    }

    /// Resolve `key`: from cache, by joining an in-flight computation, or
    /// by becoming the leader and running `compute`. The computation runs
    /// on its own task, so a cancelled leader never strands its followers.
    pub async fn submit<F, Fut>(&self, key: RequestKey, compute: F) -> BrokerResult<SharedOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BrokerResult<AnalysisOutcome>> + Send + 'static,
    {
        if let Some(hit) = lock(&self.inner.cache).get(&key) {
            trace!(fen = %key.fen, "result cache hit");
            return Ok(hit);
        }

        let grace = Duration::from_millis(self.inner.cfg.inflight_grace_ms);
        let role = {
            let mut inflight = lock(&self.inner.inflight);
            match inflight.get(&key) {
                Some(Entry::Running(tx)) => Role::Follower(tx.subscribe()),
                Some(Entry::Done(settled, at)) if at.elapsed() < grace => {
                    Role::Settled(settled.clone())
                }
                // Absent, or settled past its grace window.
                _ => {
                    let (tx, rx) = broadcast::channel(1);
                    inflight.insert(key.clone(), Entry::Running(tx.clone()));
                    Role::Leader(tx, rx)
                }
            }
        };

        let mut rx = match role {
            Role::Settled(settled) => return settled,
            Role::Follower(rx) => {
                debug!(fen = %key.fen, "collapsed onto in-flight computation");
                rx
            }
            Role::Leader(tx, rx) => {
                let inner = Arc::clone(&self.inner);
                let fut = compute();
                tokio::spawn(async move {
                    inner.drive(key, tx, fut).await;
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(settled) => settled,
            Err(_) => Err(BrokerError::Internal(
                "in-flight computation dropped its channel".to_string(),
            )),
        }
    }

    /// Point-in-time count of running computations, for status reporting.
    pub fn inflight_count(&self) -> usize {
        lock(&self.inner.inflight)
            .values()
            .filter(|e| matches!(e, Entry::Running(_)))
            .count()
    }
}

impl Inner {
    async fn drive(
        self: Arc<Self>,
        key: RequestKey,
        tx: broadcast::Sender<Settled>,
        fut: impl Future<Output = BrokerResult<AnalysisOutcome>>,
    ) {
        let settled: Settled = fut.await.map(Arc::new);

        if let Ok(outcome) = &settled {
            lock(&self.cache).insert(key.clone(), Arc::clone(outcome));
        }
        // Swap to Done before broadcasting: a waiter that finds Running has
        // already subscribed, a waiter that arrives later finds Done.
        lock(&self.inflight).insert(key.clone(), Entry::Done(settled.clone(), Instant::now()));
        let _ = tx.send(settled);

        let grace = Duration::from_millis(self.cfg.inflight_grace_ms);
        tokio::time::sleep(grace).await;
        // A newer leader may have replaced the entry; only reap our own
        // expired Done.
        let mut inflight = lock(&self.inflight);
        if matches!(inflight.get(&key), Some(Entry::Done(_, at)) if at.elapsed() >= grace) {
            inflight.remove(&key);
        }
    }
}

struct CacheSlot {
    outcome: SharedOutcome,
    inserted: Instant,
}

/// Bounded LRU of completed outcomes with a time-to-live. Small enough
/// that linear touch bookkeeping beats anything cleverer.
struct ResultCache {
    capacity: usize,
    ttl: Duration,
    slots: HashMap<RequestKey, CacheSlot>,
    order: VecDeque<RequestKey>,
}

impl ResultCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            slots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &RequestKey) -> Option<SharedOutcome> {
        let slot = self.slots.get(key)?;
        if slot.inserted.elapsed() >= self.ttl {
            self.slots.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        let outcome = Arc::clone(&slot.outcome);
        self.touch(key);
        Some(outcome)
    }

    fn insert(&mut self, key: RequestKey, outcome: SharedOutcome) {
        if self.capacity == 0 {
            return;
        }
        let slot = CacheSlot {
            outcome,
            inserted: Instant::now(),
        };
        if self.slots.insert(key.clone(), slot).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }
        while self.slots.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.slots.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, key: &RequestKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}
