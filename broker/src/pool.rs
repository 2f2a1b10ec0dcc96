//! Engine pool: bounded, leased access to engine instances.
//!
//! Each configured engine kind gets its own capacity (a semaphore sized to
//! its `slots`) and its own idle-handle stack. Callers acquire an
//! [`EngineLease`]; dropping the lease returns the handle and the slot. A
//! lease whose analysis crashed or timed out is retired instead of
//! returned, and a background task respawns a replacement with exponential
//! backoff. A kind that exhausts its respawn budget is marked degraded and
//! fails acquires immediately until restart.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{EngineDef, PoolConfig};
use crate::engine::{AdapterFactory, EngineAdapter};
use crate::error::{BrokerError, BrokerResult};
use crate::types::{AnalysisResult, EngineId, Position};

/// A mutex here only ever guards plain data; recover the value on poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EngineHandle {
    adapter: Box<dyn EngineAdapter>,
    last_used: Instant,
}

struct KindPool {
    id: EngineId,
    factory: Arc<dyn AdapterFactory>,
    sem: Arc<Semaphore>,
    idle: Mutex<Vec<EngineHandle>>,
    slots: usize,
    degraded: AtomicBool,
    busy: AtomicUsize,
    waiters: AtomicUsize,
    cfg: PoolConfig,
    strength: Option<String>,
}

impl KindPool {
    fn unavailable(&self, reason: &str) -> BrokerError {
        BrokerError::EngineUnavailable {
            engine: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    async fn acquire(self: &Arc<Self>, wait_budget: Duration) -> BrokerResult<EngineLease> {
        if self.degraded.load(Ordering::Acquire) {
            return Err(self.unavailable("degraded past respawn budget"));
        }

        let started = Instant::now();
        self.waiters.fetch_add(1, Ordering::Relaxed);
        let acquired = timeout(wait_budget, self.sem.clone().acquire_owned()).await;
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        let permit = match acquired {
            Err(_) => {
                return Err(BrokerError::PoolExhausted {
                    engine: self.id.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(_)) => return Err(self.unavailable("pool closed")),
            Ok(Ok(permit)) => permit,
        };

        let probe_after = Duration::from_secs(self.cfg.probe_after_secs);
        let handle = loop {
            let popped = lock(&self.idle).pop();
            match popped {
                Some(mut handle) => {
                    if handle.last_used.elapsed() < probe_after {
                        break handle;
                    }
                    match handle.adapter.probe().await {
                        Ok(()) => break handle,
                        Err(e) => {
                            warn!(engine = %self.id, error = %e, "idle handle failed probe; retiring");
                            handle.adapter.stop().await;
                        }
                    }
                }
                None => match self.factory.spawn().await {
                    Ok(adapter) => {
                        break EngineHandle {
                            adapter,
                            last_used: Instant::now(),
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        return Err(e);
                    }
                },
            }
        };

        self.busy.fetch_add(1, Ordering::Relaxed);
        Ok(EngineLease {
            kind: Arc::clone(self),
            handle: Some(handle),
            permit: Some(permit),
            faulted: false,
        })
    }

    /// Replace one retired instance. The slot's permit was forgotten at
    /// fault time and is only restored once a healthy replacement exists.
    async fn respawn(self: Arc<Self>) {
        let mut delay = Duration::from_millis(self.cfg.respawn_backoff_ms);
        for attempt in 1..=self.cfg.max_respawns {
            match self.factory.spawn().await {
                Ok(adapter) => {
                    lock(&self.idle).push(EngineHandle {
                        adapter,
                        last_used: Instant::now(),
                    });
                    self.sem.add_permits(1);
                    info!(engine = %self.id, attempt, "engine respawned");
                    return;
                }
                Err(e) => {
                    warn!(engine = %self.id, attempt, error = %e, "respawn attempt failed");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        error!(engine = %self.id, "respawn budget exhausted; marking degraded");
        self.degraded.store(true, Ordering::Release);
        self.sem.close();
    }

    fn status(&self) -> EngineStatus {
        let degraded = self.degraded.load(Ordering::Acquire);
        EngineStatus {
            engine: self.id.clone(),
            available: !degraded,
            degraded,
            status: if degraded { "degraded" } else { "ready" },
            slots: self.slots,
            idle: lock(&self.idle).len(),
            busy: self.busy.load(Ordering::Relaxed),
            queue_depth: self.waiters.load(Ordering::Relaxed),
            strength: self.strength.clone(),
        }
    }

    /// Demand per slot, for least-loaded routing.
    fn load_per_mille(&self) -> usize {
        let demand = self.busy.load(Ordering::Relaxed) + self.waiters.load(Ordering::Relaxed);
        demand * 1000 / self.slots.max(1)
    }
}

/// Point-in-time view of one engine kind, as reported by status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine: EngineId,
    pub available: bool,
    pub degraded: bool,
    /// Human-readable state label mirroring the two flags.
    pub status: &'static str,
    pub slots: usize,
    pub idle: usize,
    pub busy: usize,
    pub queue_depth: usize,
    pub strength: Option<String>,
}

/// Pool over every configured engine kind.
pub struct EnginePool {
    kinds: Vec<Arc<KindPool>>,
    cfg: PoolConfig,
}

impl EnginePool {
    /// Build the pool. Instances spawn lazily on first acquire, so a
    /// missing engine binary surfaces per-request rather than at startup.
    pub fn new(
        cfg: PoolConfig,
        defs: &[EngineDef],
        factories: Vec<Arc<dyn AdapterFactory>>,
    ) -> Arc<Self> {
        let kinds = defs
            .iter()
            .filter_map(|def| {
                let factory = factories.iter().find(|f| f.engine_id() == &def.id)?;
                Some(Arc::new(KindPool {
                    id: def.id.clone(),
                    factory: Arc::clone(factory),
                    sem: Arc::new(Semaphore::new(def.slots)),
                    idle: Mutex::new(Vec::new()),
                    slots: def.slots,
                    degraded: AtomicBool::new(false),
                    busy: AtomicUsize::new(0),
                    waiters: AtomicUsize::new(0),
                    cfg: cfg.clone(),
                    strength: def.strength.clone(),
                }))
            })
            .collect();
        Arc::new(Self { kinds, cfg })
    }

    fn kind(&self, engine: &str) -> Option<&Arc<KindPool>> {
        self.kinds.iter().find(|k| k.id == engine)
    }

    /// Lease an instance of `engine`, waiting at most `wait_budget` for a
    /// free slot.
    pub async fn acquire(
        &self,
        engine: &EngineId,
        wait_budget: Duration,
    ) -> BrokerResult<EngineLease> {
        let kind = self.kind(engine).ok_or_else(|| BrokerError::EngineUnavailable {
            engine: engine.clone(),
            reason: "not a configured engine".to_string(),
        })?;
        kind.acquire(wait_budget).await
    }

    /// Default cap on acquire waits; callers with a tighter budget pass
    /// their own.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.acquire_timeout_ms)
    }

    pub fn is_degraded(&self, engine: &str) -> bool {
        self.kind(engine)
            .map(|k| k.degraded.load(Ordering::Acquire))
            .unwrap_or(true)
    }

    /// The non-degraded kind with the lowest demand per slot.
    pub fn least_loaded(&self) -> Option<EngineId> {
        self.kinds
            .iter()
            .filter(|k| !k.degraded.load(Ordering::Acquire))
            .min_by_key(|k| k.load_per_mille())
            .map(|k| k.id.clone())
    }

    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.kinds.iter().map(|k| k.id.clone()).collect()
    }

    pub fn status(&self) -> Vec<EngineStatus> {
        self.kinds.iter().map(|k| k.status()).collect()
    }

    /// Stop every idle instance and refuse further acquires. In-flight
    /// leases finish on their own.
    pub async fn shutdown(&self) {
        for kind in &self.kinds {
            kind.sem.close();
            let handles: Vec<EngineHandle> = lock(&kind.idle).drain(..).collect();
            for mut handle in handles {
                handle.adapter.stop().await;
            }
            debug!(engine = %kind.id, "kind pool shut down");
        }
    }
}

/// Exclusive use of one engine instance. Dropping the lease returns the
/// slot; a lease that saw a crash or timeout retires its instance instead.
pub struct EngineLease {
    kind: Arc<KindPool>,
    handle: Option<EngineHandle>,
    permit: Option<OwnedSemaphorePermit>,
    faulted: bool,
}

impl EngineLease {
    pub fn engine_id(&self) -> &EngineId {
        &self.kind.id
    }

    /// Run one analysis on the leased instance. A crash or timeout marks
    /// the lease faulted; the error still propagates to the caller.
    pub async fn analyze(
        &mut self,
        position: &Position,
        depth: u32,
        elo_limit: u32,
        time_budget: Duration,
    ) -> BrokerResult<AnalysisResult> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| BrokerError::Internal("lease has no handle".to_string()))?;
        let outcome = handle
            .adapter
            .analyze(position, depth, elo_limit, time_budget)
            .await;
        if matches!(
            outcome,
            Err(BrokerError::EngineCrashed { .. } | BrokerError::EngineTimeout { .. })
        ) {
            self.faulted = true;
        }
        outcome
    }
}

// The boxed adapter has no useful Debug of its own.
impl std::fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLease")
            .field("engine", &self.kind.id)
            .field("faulted", &self.faulted)
            .finish_non_exhaustive()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.kind.busy.fetch_sub(1, Ordering::Relaxed);
        let handle = self.handle.take();
        let permit = self.permit.take();

        if !self.faulted {
            if let Some(mut handle) = handle {
                handle.last_used = Instant::now();
                lock(&self.kind.idle).push(handle);
            }
            return;
        }

        // Faulted: the slot stays withheld until a replacement is healthy.
        if let Some(permit) = permit {
            permit.forget();
        }
        let kind = Arc::clone(&self.kind);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(mut handle) = handle {
                    handle.adapter.stop().await;
                }
                kind.respawn().await;
            });
        }
    }
}
