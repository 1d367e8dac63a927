use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use hashbrown::HashMap;
use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tessera_io::{RegionFileCoord, RegionFileStore, RegionHeader, region_coord_from_path};
use tessera_world::{ChunkCoord, RegionCoord, WorldLayout};

use crate::error::RuntimeError;
use crate::event::{ChangeSink, DirtyReason, DirtyRegionEvent};

const IDLE_POLL: Duration = Duration::from_millis(250);

/// Sending side of a [`ChangeWatcher`]. Sends block while the channel is full.
#[derive(Clone)]
pub struct ChangeHandle {
    tx: Sender<DirtyRegionEvent>,
}

impl ChangeHandle {
    /// Returns false once the watcher has shut down.
    pub fn send(&self, event: DirtyRegionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl ChangeSink for ChangeHandle {
    fn notify_region_dirty(&self, region: RegionCoord, reason: DirtyReason) {
        self.send(DirtyRegionEvent::new(region, reason));
    }

    fn notify_event(&self, event: DirtyRegionEvent) {
        self.send(event);
    }
}

/// Bounded channel from collaborators into a sink, usually the render
/// service. A pump thread drains it in batches and merges duplicate events.
pub struct ChangeWatcher {
    tx: Sender<DirtyRegionEvent>,
    stop: Sender<()>,
    pump: Option<JoinHandle<()>>,
    forwarded: Arc<AtomicU64>,
    merged: Arc<AtomicU64>,
}

impl ChangeWatcher {
    pub fn spawn(capacity: usize, target: Arc<dyn ChangeSink>) -> Result<Self, RuntimeError> {
        let (tx, rx) = bounded::<DirtyRegionEvent>(capacity.max(1));
        let (stop, stop_rx) = bounded::<()>(1);
        let forwarded = Arc::new(AtomicU64::new(0));
        let merged = Arc::new(AtomicU64::new(0));
        let pump = {
            let forwarded = forwarded.clone();
            let merged = merged.clone();
            thread::Builder::new()
                .name("tessera-change-pump".into())
                .spawn(move || pump_loop(rx, stop_rx, target, forwarded, merged))
                .map_err(|source| RuntimeError::Io {
                    context: "spawning change pump".into(),
                    source,
                })?
        };
        Ok(Self {
            tx,
            stop,
            pump: Some(pump),
            forwarded,
            merged,
        })
    }

    pub fn handle(&self) -> ChangeHandle {
        ChangeHandle {
            tx: self.tx.clone(),
        }
    }

    /// Events passed on to the target so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Events folded into an identical event of the same batch.
    pub fn merged(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    /// Forwards whatever is already queued, then stops the pump.
    pub fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("change pump panicked");
            }
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn forward_batch(
    batch: Vec<DirtyRegionEvent>,
    target: &dyn ChangeSink,
    forwarded: &AtomicU64,
    merged: &AtomicU64,
) {
    let mut order: Vec<(RegionCoord, DirtyReason)> = Vec::with_capacity(batch.len());
    let mut best: HashMap<(RegionCoord, DirtyReason), u8> = HashMap::with_capacity(batch.len());
    for ev in batch {
        let key = (ev.region, ev.reason);
        match best.get_mut(&key) {
            Some(p) => {
                *p = (*p).max(ev.priority);
                merged.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                best.insert(key, ev.priority);
                order.push(key);
            }
        }
    }
    for (region, reason) in order {
        let priority = best[&(region, reason)];
        target.notify_event(DirtyRegionEvent {
            region,
            reason,
            priority,
        });
        forwarded.fetch_add(1, Ordering::Relaxed);
    }
}

fn pump_loop(
    rx: Receiver<DirtyRegionEvent>,
    stop: Receiver<()>,
    target: Arc<dyn ChangeSink>,
    forwarded: Arc<AtomicU64>,
    merged: Arc<AtomicU64>,
) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(first) => {
                    let mut batch = vec![first];
                    batch.extend(rx.try_iter());
                    forward_batch(batch, target.as_ref(), &forwarded, &merged);
                }
                Err(_) => break,
            },
            recv(stop) -> _ => {
                let rest: Vec<_> = rx.try_iter().collect();
                if !rest.is_empty() {
                    forward_batch(rest, target.as_ref(), &forwarded, &merged);
                }
                break;
            }
        }
    }
    debug!("change pump stopped");
}

/// Per-key delay: a key touched again before its delay elapses keeps its
/// original due time.
#[derive(Debug)]
pub struct Debouncer<K> {
    delay: Duration,
    pending: HashMap<K, Instant>,
}

impl<K: Copy + Eq + Hash + Ord> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Returns true if the key was newly scheduled.
    pub fn touch(&mut self, key: K, now: Instant) -> bool {
        if self.pending.contains_key(&key) {
            return false;
        }
        self.pending.insert(key, now + self.delay);
        true
    }

    /// Keys whose delay has elapsed, sorted; they are no longer pending.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| *k)
            .collect();
        due.sort();
        for k in &due {
            self.pending.remove(k);
        }
        due
    }

    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .min()
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Last seen header of each region file; a new header diffed against it
/// yields the chunks that were rewritten or removed.
#[derive(Debug, Default)]
pub struct HeaderDiff {
    dir: PathBuf,
    headers: HashMap<RegionFileCoord, RegionHeader>,
}

impl HeaderDiff {
    /// Reads the current header of every region file in `dir`.
    pub fn prime(dir: &Path) -> Self {
        let store = RegionFileStore::new(dir);
        let mut headers = HashMap::new();
        match store.region_files() {
            Ok(files) => {
                for file in files {
                    match RegionHeader::read(&store.path_of(file)) {
                        Ok(h) => {
                            headers.insert(file, h);
                        }
                        Err(e) => warn!("could not read header of {}: {e}", file.file_name()),
                    }
                }
            }
            Err(e) => warn!("could not list {}: {e}", dir.display()),
        }
        Self {
            dir: dir.to_path_buf(),
            headers,
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Chunks of `file` whose location or timestamp changed since the last
    /// call. A deleted file reports every chunk it used to hold.
    pub fn changed_chunks(&mut self, file: RegionFileCoord) -> Vec<ChunkCoord> {
        let path = self.dir.join(file.file_name());
        let current = match RegionHeader::read(&path) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::NotFound => RegionHeader::default(),
            Err(e) => {
                warn!("could not read header of {}: {e}", path.display());
                return Vec::new();
            }
        };
        let previous = self.headers.remove(&file).unwrap_or_default();
        let changed = current
            .changed_since(&previous)
            .into_iter()
            .map(|i| file.chunk_at(i))
            .collect();
        self.headers.insert(file, current);
        changed
    }
}

/// Watches a region-file directory and reports rewritten chunks to a sink as
/// `ChunkChanged` events for the render region holding each chunk.
pub struct RegionFileWatcher {
    _watcher: RecommendedWatcher,
    stop: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl RegionFileWatcher {
    pub fn start(
        dir: &Path,
        layout: WorldLayout,
        debounce: Duration,
        sink: Arc<dyn ChangeSink>,
    ) -> Result<Self, RuntimeError> {
        let mut diff = HeaderDiff::prime(dir);
        info!(
            "watching {} ({} region files)",
            dir.display(),
            diff.len()
        );

        let (tx, rx) = unbounded::<RegionFileCoord>();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    match event.kind {
                        EventKind::Modify(_)
                        | EventKind::Create(_)
                        | EventKind::Remove(_)
                        | EventKind::Any => {
                            for p in event.paths {
                                if let Some(file) = region_coord_from_path(&p) {
                                    let _ = tx.send(file);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let (stop, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("tessera-region-watch".into())
            .spawn(move || {
                let mut debouncer = Debouncer::new(debounce);
                loop {
                    let wait = debouncer
                        .next_due_in(Instant::now())
                        .unwrap_or(IDLE_POLL)
                        .min(IDLE_POLL);
                    select! {
                        recv(rx) -> msg => match msg {
                            Ok(file) => {
                                debouncer.touch(file, Instant::now());
                            }
                            Err(_) => break,
                        },
                        recv(stop_rx) -> _ => break,
                        default(wait) => {}
                    }
                    for file in debouncer.take_due(Instant::now()) {
                        let changed = diff.changed_chunks(file);
                        debug!("{}: {} chunks changed", file.file_name(), changed.len());
                        for coord in changed {
                            sink.notify_region_dirty(
                                layout.region_of_chunk(coord),
                                DirtyReason::ChunkChanged(coord),
                            );
                        }
                    }
                }
            })
            .map_err(|source| RuntimeError::Io {
                context: "spawning region watcher".into(),
                source,
            })?;
        Ok(Self {
            _watcher: watcher,
            stop,
            worker: Some(worker),
        })
    }

    pub fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("region watcher thread panicked");
            }
        }
    }
}

impl Drop for RegionFileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
