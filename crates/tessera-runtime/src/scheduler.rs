use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tessera_world::{LodPolicy, TileKey};

use crate::error::{RenderError, RuntimeError};
use crate::event::DirtyRegionEvent;
use crate::queue::{EnqueueOutcome, RenderQueue};

/// Longest a worker sleeps without a retry to wake it.
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 250,
            max_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self.base_ms.saturating_mul(1u64 << shift).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Render threads; 0 picks the number of available cores.
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Seconds between progress log lines; 0 disables them.
    pub progress_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 4096,
            retry: RetryPolicy::default(),
            progress_interval_secs: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// What a finished render reports back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    pub version: u64,
    /// Placeholder stored; the key renders again on its next dirty event.
    pub incomplete: bool,
    /// The cache already held a newer tile.
    pub superseded: bool,
}

/// Work performed for one key. Called from many workers at once, never twice
/// concurrently for the same key.
pub trait RenderJob: Send + Sync + 'static {
    fn render(&self, key: TileKey) -> Result<RenderOutcome, RenderError>;
}

/// Operator-facing view of one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionStatus {
    Idle,
    Queued { priority: u8 },
    Rendering { dirty: bool },
    RetryWaiting { attempt: u32, retry_in: Duration },
    Failed { attempts: u32, error: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub parked: usize,
    pub rendering: usize,
    pub retry_waiting: usize,
    pub completed: u64,
    pub incomplete: u64,
    pub coalesced: u64,
    pub displaced: u64,
    pub parked_total: u64,
    pub redirtied: u64,
    pub retries: u64,
    pub failed: u64,
    pub panics: u64,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Queued,
    Rendering { priority: u8, redirty: Option<u8> },
    RetryWaiting { attempt: u32, due: Instant, priority: u8 },
}

#[derive(Clone, Debug)]
struct Failure {
    attempts: u32,
    error: String,
}

struct Progress {
    started: Instant,
    last_report: Instant,
    completed_at_start: u64,
}

struct SchedState {
    queue: RenderQueue,
    phases: HashMap<TileKey, Phase>,
    retry_due: BTreeSet<(Instant, TileKey)>,
    attempts: HashMap<TileKey, u32>,
    failures: HashMap<TileKey, Failure>,
    stats: SchedulerStats,
    progress: Progress,
    live_workers: usize,
    shutdown: bool,
}

impl SchedState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.phases.is_empty()
    }

    /// Offers `key` to the queue. Rendering keys are only marked dirty.
    fn push(&mut self, key: TileKey, priority: u8) -> EnqueueOutcome {
        if self.shutdown {
            return EnqueueOutcome::Closed;
        }
        match self.phases.get_mut(&key) {
            Some(Phase::Rendering { redirty, .. }) => {
                *redirty = Some(redirty.map_or(priority, |p| p.max(priority)));
                self.stats.redirtied += 1;
                return EnqueueOutcome::MarkedDirty;
            }
            Some(Phase::RetryWaiting { due, .. }) => {
                let due = *due;
                self.retry_due.remove(&(due, key));
            }
            Some(Phase::Queued) | None => {}
        }
        let outcome = self.queue.push(key, priority);
        self.phases.insert(key, Phase::Queued);
        match outcome {
            EnqueueOutcome::Coalesced => self.stats.coalesced += 1,
            EnqueueOutcome::Displaced(victim) => {
                self.stats.displaced += 1;
                debug!("{victim} displaced by {key}");
            }
            EnqueueOutcome::Parked => self.stats.parked_total += 1,
            _ => {}
        }
        outcome
    }

    fn promote_due_retries(&mut self, now: Instant) {
        while let Some(&(due, key)) = self.retry_due.first() {
            if due > now {
                break;
            }
            self.retry_due.remove(&(due, key));
            if let Some(Phase::RetryWaiting { priority, .. }) = self.phases.remove(&key) {
                self.stats.retries += 1;
                self.push(key, priority);
            }
        }
    }

    fn snapshot_stats(&self) -> SchedulerStats {
        let mut stats = self.stats;
        stats.queued = self.queue.len();
        stats.parked = self.queue.parked_len();
        stats.rendering = self
            .phases
            .values()
            .filter(|p| matches!(p, Phase::Rendering { .. }))
            .count();
        stats.retry_waiting = self.retry_due.len();
        stats
    }
}

struct Shared {
    state: Mutex<SchedState>,
    work: Condvar,
    idle: Condvar,
    lod: LodPolicy,
    retry: RetryPolicy,
    progress_interval: Option<Duration>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap()
    }

    fn next_job(&self) -> Option<(TileKey, u8)> {
        let mut st = self.lock();
        loop {
            if st.shutdown {
                return None;
            }
            let now = Instant::now();
            st.promote_due_retries(now);
            if let Some((key, priority)) = st.queue.pop() {
                st.phases.insert(
                    key,
                    Phase::Rendering {
                        priority,
                        redirty: None,
                    },
                );
                return Some((key, priority));
            }
            let timeout = st
                .retry_due
                .first()
                .map(|&(due, _)| due.saturating_duration_since(now))
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);
            st = self.work.wait_timeout(st, timeout).unwrap().0;
        }
    }

    fn finish(&self, key: TileKey, result: Result<RenderOutcome, RenderError>) {
        let mut st = self.lock();
        let (priority, redirty) = match st.phases.remove(&key) {
            Some(Phase::Rendering { priority, redirty }) => (priority, redirty),
            other => {
                warn!("finished {key} in unexpected phase {other:?}");
                (0, None)
            }
        };
        match result {
            Ok(outcome) => {
                st.stats.completed += 1;
                st.attempts.remove(&key);
                st.failures.remove(&key);
                if outcome.incomplete {
                    st.stats.incomplete += 1;
                    debug!("{key} stored as placeholder at v{}", outcome.version);
                }
                // The parent may publish while sibling children are still queued
                // and read their older tiles. Each sibling re-pushes it on
                // completion, so the last parent render sees every child.
                if !outcome.superseded && key.level < self.lod.max_level {
                    st.push(key.parent(self.lod.ratio), priority);
                }
            }
            Err(e) if e.is_retryable() && redirty.is_none() => {
                let attempt = {
                    let n = st.attempts.entry(key).or_insert(0);
                    *n += 1;
                    *n
                };
                if attempt < self.retry.max_attempts {
                    let delay = self.retry.delay(attempt);
                    warn!("{e}; retry {attempt} in {delay:?}");
                    let due = Instant::now() + delay;
                    st.retry_due.insert((due, key));
                    st.phases.insert(
                        key,
                        Phase::RetryWaiting {
                            attempt,
                            due,
                            priority,
                        },
                    );
                } else {
                    error!("{e}; giving up after {attempt} attempts");
                    st.attempts.remove(&key);
                    st.stats.failed += 1;
                    st.failures.insert(
                        key,
                        Failure {
                            attempts: attempt,
                            error: e.to_string(),
                        },
                    );
                }
            }
            Err(e) => {
                if matches!(e, RenderError::Panicked { .. }) {
                    st.stats.panics += 1;
                }
                if redirty.is_none() {
                    error!("{e}");
                    st.stats.failed += 1;
                    let attempts = st.attempts.remove(&key).unwrap_or(0) + 1;
                    st.failures.insert(
                        key,
                        Failure {
                            attempts,
                            error: e.to_string(),
                        },
                    );
                } else {
                    warn!("{e}; rendering again for a newer change");
                }
            }
        }
        if let Some(p) = redirty {
            st.push(key, p);
        }
        self.report_progress(&mut st);
        self.work.notify_all();
        if st.is_idle() {
            self.idle.notify_all();
        }
    }

    fn report_progress(&self, st: &mut SchedState) {
        let Some(interval) = self.progress_interval else {
            return;
        };
        let now = Instant::now();
        if now.duration_since(st.progress.last_report) < interval {
            return;
        }
        st.progress.last_report = now;
        let done = st.stats.completed - st.progress.completed_at_start;
        let pending = st.queue.len() + st.queue.parked_len();
        let elapsed = now.duration_since(st.progress.started).as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        if pending == 0 {
            info!("rendered {done} tiles ({rate:.1}/s), queue empty");
        } else if rate > 0.0 {
            info!(
                "rendered {done} tiles ({rate:.1}/s), {pending} pending, eta {:.0}s",
                pending as f64 / rate
            );
        } else {
            info!("rendered {done} tiles, {pending} pending");
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_loop(shared: Arc<Shared>, job: Arc<dyn RenderJob>) {
    while let Some((key, _priority)) = shared.next_job() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| job.render(key)))
            .unwrap_or_else(|payload| {
                Err(RenderError::Panicked {
                    key,
                    message: panic_message(payload),
                })
            });
        shared.finish(key, result);
    }
    let mut st = shared.lock();
    st.live_workers -= 1;
    shared.idle.notify_all();
}

/// Fixed pool of render workers fed from a bounded priority queue. Each key is
/// rendered by at most one worker at a time; a key dirtied mid-render renders
/// again once the current pass completes.
pub struct RenderScheduler {
    shared: Arc<Shared>,
    workers: usize,
    _pool: ThreadPool,
}

impl RenderScheduler {
    pub fn start(
        config: &SchedulerConfig,
        lod: LodPolicy,
        job: Arc<dyn RenderJob>,
    ) -> Result<Self, RuntimeError> {
        let workers = config.worker_count();
        let now = Instant::now();
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedState {
                queue: RenderQueue::new(config.queue_capacity),
                phases: HashMap::new(),
                retry_due: BTreeSet::new(),
                attempts: HashMap::new(),
                failures: HashMap::new(),
                stats: SchedulerStats::default(),
                progress: Progress {
                    started: now,
                    last_report: now,
                    completed_at_start: 0,
                },
                live_workers: workers,
                shutdown: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
            lod,
            retry: config.retry,
            progress_interval: (config.progress_interval_secs > 0)
                .then(|| Duration::from_secs(config.progress_interval_secs)),
        });
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tessera-render-{i}"))
            .build()?;
        for _ in 0..workers {
            let shared = shared.clone();
            let job = job.clone();
            pool.spawn(move || worker_loop(shared, job));
        }
        info!("render scheduler started with {workers} workers");
        Ok(Self {
            shared,
            workers,
            _pool: pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn enqueue(&self, event: DirtyRegionEvent) -> EnqueueOutcome {
        debug!("dirty {} ({}), priority {}", event.region, event.reason, event.priority);
        self.enqueue_key(TileKey::base(event.region), event.priority)
    }

    pub fn enqueue_key(&self, key: TileKey, priority: u8) -> EnqueueOutcome {
        let outcome = self.shared.lock().push(key, priority);
        if !matches!(outcome, EnqueueOutcome::Closed | EnqueueOutcome::MarkedDirty) {
            self.shared.work.notify_one();
        }
        outcome
    }

    /// Blocks until nothing is queued, rendering or waiting to retry. Returns
    /// false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.lock();
        while !st.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self
                .shared
                .idle
                .wait_timeout(st, (deadline - now).min(IDLE_POLL))
                .unwrap()
                .0;
        }
        true
    }

    pub fn status(&self, key: TileKey) -> RegionStatus {
        let st = self.shared.lock();
        match st.phases.get(&key) {
            Some(Phase::Queued) => RegionStatus::Queued {
                priority: st.queue.priority_of(key).unwrap_or(0),
            },
            Some(Phase::Rendering { redirty, .. }) => RegionStatus::Rendering {
                dirty: redirty.is_some(),
            },
            Some(Phase::RetryWaiting { attempt, due, .. }) => RegionStatus::RetryWaiting {
                attempt: *attempt,
                retry_in: due.saturating_duration_since(Instant::now()),
            },
            None => match st.failures.get(&key) {
                Some(f) => RegionStatus::Failed {
                    attempts: f.attempts,
                    error: f.error.clone(),
                },
                None => RegionStatus::Idle,
            },
        }
    }

    /// Keys whose last render failed for good, sorted.
    pub fn failures(&self) -> Vec<(TileKey, String)> {
        let st = self.shared.lock();
        let mut out: Vec<_> = st
            .failures
            .iter()
            .map(|(k, f)| (*k, f.error.clone()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().snapshot_stats()
    }

    /// Stops accepting work and waits for in-flight renders to finish. Keys
    /// still queued are dropped; their tiles stay stale in the cache.
    pub fn shutdown(&self) {
        let mut st = self.shared.lock();
        if !st.shutdown {
            st.shutdown = true;
            let dropped = st.queue.len() + st.queue.parked_len() + st.retry_due.len();
            if dropped > 0 {
                info!("shutting down with {dropped} renders pending");
            }
        }
        self.shared.work.notify_all();
        while st.live_workers > 0 {
            st = self.shared.idle.wait_timeout(st, IDLE_POLL).unwrap().0;
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("workers", &self.workers)
            .field("stats", &self.stats())
            .finish()
    }
}
