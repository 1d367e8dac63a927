use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use hashbrown::HashMap;
use tessera_runtime::{
    EnqueueOutcome, RegionStatus, RenderError, RenderJob, RenderOutcome, RenderScheduler,
    RetryPolicy, SchedulerConfig,
};
use tessera_tiles::TileCacheError;
use tessera_world::{LodPolicy, RegionCoord, TileKey};

const FLAT: LodPolicy = LodPolicy {
    ratio: 2,
    max_level: 0,
};
const WAIT: Duration = Duration::from_secs(30);

fn key(x: i32) -> TileKey {
    TileKey::base(RegionCoord::new(x, 0))
}

fn config(workers: usize, capacity: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        queue_capacity: capacity,
        retry: RetryPolicy {
            base_ms: 10,
            max_ms: 40,
            max_attempts: 3,
        },
        progress_interval_secs: 0,
    }
}

/// Records renders; optionally holds the first render until released, fails
/// scripted keys and panics on request.
#[derive(Default)]
struct ScriptedJob {
    log: Mutex<Vec<(TileKey, u64)>>,
    world_version: AtomicU64,
    gate: Mutex<Option<(Sender<TileKey>, Receiver<()>)>>,
    failures: Mutex<HashMap<TileKey, u32>>,
    panics_on: Mutex<HashSet<TileKey>>,
    active: Mutex<HashSet<TileKey>>,
    overlaps: AtomicUsize,
    starts: Mutex<HashMap<TileKey, u64>>,
    clock: Arc<AtomicU64>,
}

impl ScriptedJob {
    /// The first render blocks until a unit is sent on the returned sender.
    fn gated(self: &Arc<Self>) -> (Receiver<TileKey>, Sender<()>) {
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        *self.gate.lock().unwrap() = Some((started_tx, release_rx));
        (started_rx, release_tx)
    }

    fn rendered(&self) -> Vec<TileKey> {
        self.log.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

impl RenderJob for ScriptedJob {
    fn render(&self, key: TileKey) -> Result<RenderOutcome, RenderError> {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().insert(key, stamp);
        if !self.active.lock().unwrap().insert(key) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let version = self.world_version.load(Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some((started, release)) = gate {
            started.send(key).unwrap();
            release.recv().unwrap();
        }
        if self.panics_on.lock().unwrap().contains(&key) {
            self.active.lock().unwrap().remove(&key);
            panic!("scripted panic for {key}");
        }
        thread::sleep(Duration::from_micros(200));
        self.active.lock().unwrap().remove(&key);

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&key) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(RenderError::CacheWrite {
                key,
                source: TileCacheError::Io(io::Error::other("disk full")),
            });
        }
        self.log.lock().unwrap().push((key, version));
        Ok(RenderOutcome {
            version,
            incomplete: false,
            superseded: false,
        })
    }
}

#[test]
fn storms_never_render_a_key_twice_at_once_nor_forget_it() {
    let job = Arc::new(ScriptedJob::default());
    let sched = Arc::new(RenderScheduler::start(&config(4, 8), FLAT, job.clone()).unwrap());
    let last_enqueue: Arc<Mutex<HashMap<TileKey, u64>>> = Arc::default();
    let storms: Vec<_> = (0..8u64)
        .map(|t| {
            let sched = sched.clone();
            let job = job.clone();
            let last_enqueue = last_enqueue.clone();
            thread::spawn(move || {
                for i in 0..200u64 {
                    let k = key(((t * 7 + i * 13) % 16) as i32);
                    let stamp = job.clock.fetch_add(1, Ordering::SeqCst);
                    last_enqueue.lock().unwrap().insert(k, stamp);
                    let outcome = sched.enqueue_key(k, ((i * 31 + t) % 256) as u8);
                    assert_ne!(outcome, EnqueueOutcome::Closed);
                }
            })
        })
        .collect();
    for s in storms {
        s.join().unwrap();
    }
    assert!(sched.wait_idle(WAIT));
    assert_eq!(job.overlaps.load(Ordering::SeqCst), 0);
    let starts = job.starts.lock().unwrap();
    for (k, enqueued) in last_enqueue.lock().unwrap().iter() {
        let started = starts.get(k).copied().unwrap_or(0);
        assert!(started > *enqueued, "{k} was dirtied after its last render");
    }
    let stats = sched.stats();
    assert!(stats.coalesced + stats.redirtied > 0);
    assert_eq!(stats.queued + stats.parked + stats.rendering, 0);
}

#[test]
fn queued_duplicates_coalesce_at_the_highest_priority() {
    let job = Arc::new(ScriptedJob::default());
    let (started, release) = job.gated();
    let sched = RenderScheduler::start(&config(1, 16), FLAT, job.clone()).unwrap();
    sched.enqueue_key(key(0), 10);
    assert_eq!(started.recv().unwrap(), key(0));

    assert_eq!(sched.enqueue_key(key(1), 1), EnqueueOutcome::Queued);
    assert_eq!(sched.enqueue_key(key(2), 5), EnqueueOutcome::Queued);
    assert_eq!(sched.enqueue_key(key(1), 9), EnqueueOutcome::Coalesced);
    assert_eq!(sched.enqueue_key(key(1), 2), EnqueueOutcome::Coalesced);
    assert_eq!(sched.status(key(1)), RegionStatus::Queued { priority: 9 });
    assert_eq!(sched.stats().queued, 2);

    release.send(()).unwrap();
    assert!(sched.wait_idle(WAIT));
    assert_eq!(job.rendered(), vec![key(0), key(1), key(2)]);
    assert_eq!(sched.status(key(1)), RegionStatus::Idle);
}

#[test]
fn redirty_mid_render_gives_exactly_two_sequential_renders() {
    let job = Arc::new(ScriptedJob::default());
    job.world_version.store(1, Ordering::SeqCst);
    let (started, release) = job.gated();
    let sched = RenderScheduler::start(&config(3, 16), FLAT, job.clone()).unwrap();
    sched.enqueue_key(key(4), 50);
    started.recv().unwrap();

    job.world_version.store(2, Ordering::SeqCst);
    assert_eq!(sched.enqueue_key(key(4), 60), EnqueueOutcome::MarkedDirty);
    assert_eq!(sched.enqueue_key(key(4), 70), EnqueueOutcome::MarkedDirty);
    assert_eq!(sched.status(key(4)), RegionStatus::Rendering { dirty: true });

    release.send(()).unwrap();
    assert!(sched.wait_idle(WAIT));
    let log = job.log.lock().unwrap().clone();
    assert_eq!(log, vec![(key(4), 1), (key(4), 2)]);
    assert_eq!(job.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn full_queue_parks_instead_of_forgetting() {
    let job = Arc::new(ScriptedJob::default());
    let (started, release) = job.gated();
    let sched = RenderScheduler::start(&config(1, 2), FLAT, job.clone()).unwrap();
    sched.enqueue_key(key(0), 100);
    started.recv().unwrap();

    let mut outcomes = Vec::new();
    for (x, p) in [(1, 10), (2, 20), (3, 5), (4, 30), (5, 20)] {
        outcomes.push(sched.enqueue_key(key(x), p));
    }
    assert_eq!(
        outcomes,
        vec![
            EnqueueOutcome::Queued,
            EnqueueOutcome::Queued,
            EnqueueOutcome::Parked,
            EnqueueOutcome::Displaced(key(1)),
            EnqueueOutcome::Parked,
        ]
    );
    let stats = sched.stats();
    assert_eq!((stats.queued, stats.parked), (2, 3));

    release.send(()).unwrap();
    assert!(sched.wait_idle(WAIT));
    assert_eq!(
        job.rendered(),
        vec![key(0), key(4), key(2), key(5), key(1), key(3)]
    );
}

#[test]
fn cache_write_failures_retry_with_backoff_then_give_up() {
    let job = Arc::new(ScriptedJob::default());
    job.failures.lock().unwrap().insert(key(1), 1);
    job.failures.lock().unwrap().insert(key(2), 10);
    let sched = RenderScheduler::start(&config(2, 16), FLAT, job.clone()).unwrap();
    sched.enqueue_key(key(1), 10);
    sched.enqueue_key(key(2), 10);
    assert!(sched.wait_idle(WAIT));

    assert_eq!(job.rendered(), vec![key(1)]);
    assert_eq!(sched.status(key(1)), RegionStatus::Idle);
    match sched.status(key(2)) {
        RegionStatus::Failed { attempts, error } => {
            assert_eq!(attempts, 3);
            assert!(error.contains("disk full"), "{error}");
        }
        other => panic!("expected a permanent failure, got {other:?}"),
    }
    let stats = sched.stats();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(sched.failures().len(), 1);

    // a new dirty event tries again and clears the failure on success
    job.failures.lock().unwrap().insert(key(2), 0);
    sched.enqueue_key(key(2), 10);
    assert!(sched.wait_idle(WAIT));
    assert_eq!(sched.status(key(2)), RegionStatus::Idle);
    assert!(sched.failures().is_empty());
}

#[test]
fn panicking_render_is_contained() {
    let job = Arc::new(ScriptedJob::default());
    job.panics_on.lock().unwrap().insert(key(7));
    let sched = RenderScheduler::start(&config(1, 16), FLAT, job.clone()).unwrap();
    sched.enqueue_key(key(7), 10);
    sched.enqueue_key(key(8), 5);
    assert!(sched.wait_idle(WAIT));
    assert!(matches!(sched.status(key(7)), RegionStatus::Failed { .. }));
    assert_eq!(job.rendered(), vec![key(8)]);
    assert_eq!(sched.stats().panics, 1);
}

#[test]
fn completed_tiles_schedule_their_ancestors() {
    let lod = LodPolicy {
        ratio: 2,
        max_level: 2,
    };
    let job = Arc::new(ScriptedJob::default());
    let sched = RenderScheduler::start(&config(2, 16), lod, job.clone()).unwrap();
    sched.enqueue_key(key(0), 10);
    sched.enqueue_key(key(1), 10);
    assert!(sched.wait_idle(WAIT));
    let rendered = job.rendered();
    let parent = TileKey::new(RegionCoord::new(0, 0), 1);
    let grandparent = TileKey::new(RegionCoord::new(0, 0), 2);
    assert!(rendered.contains(&parent));
    assert!(rendered.contains(&grandparent));
    // the last render of each level sees both children finished
    let last = |k: TileKey| rendered.iter().rposition(|r| *r == k).unwrap();
    assert!(last(parent) > last(key(0)) && last(parent) > last(key(1)));
    assert!(last(grandparent) > last(parent));
}

#[test]
fn shutdown_refuses_new_work() {
    let job = Arc::new(ScriptedJob::default());
    let sched = RenderScheduler::start(&config(2, 16), FLAT, job).unwrap();
    sched.shutdown();
    assert_eq!(sched.enqueue_key(key(0), 1), EnqueueOutcome::Closed);
}
