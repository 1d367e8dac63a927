use std::cmp::Reverse;
use std::collections::BTreeSet;

use hashbrown::HashMap;
use tessera_world::TileKey;

/// Result of offering a key to the scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Merged into an existing entry for the same key.
    Coalesced,
    /// Admitted by pushing the lowest-priority entry into the overflow set.
    Displaced(TileKey),
    /// The bounded queue is full; the key waits in the overflow set.
    Parked,
    /// The key is rendering; another pass follows the current one.
    MarkedDirty,
    /// The scheduler is shutting down.
    Closed,
}

type Slot = (Reverse<u8>, u64, TileKey);

/// Ordered set of keys: priority descending, then arrival order.
#[derive(Default, Debug)]
struct Lane {
    order: BTreeSet<Slot>,
    index: HashMap<TileKey, (u8, u64)>,
}

impl Lane {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn contains(&self, key: TileKey) -> bool {
        self.index.contains_key(&key)
    }

    fn insert(&mut self, key: TileKey, priority: u8, seq: u64) {
        self.index.insert(key, (priority, seq));
        self.order.insert((Reverse(priority), seq, key));
    }

    fn remove(&mut self, key: TileKey) -> Option<(u8, u64)> {
        let (p, seq) = self.index.remove(&key)?;
        self.order.remove(&(Reverse(p), seq, key));
        Some((p, seq))
    }

    /// Raises the entry's priority to `priority` if that is higher.
    fn raise(&mut self, key: TileKey, priority: u8) {
        if let Some(&(p, seq)) = self.index.get(&key) {
            if priority > p {
                self.remove(key);
                self.insert(key, priority, seq);
            }
        }
    }

    fn first(&self) -> Option<Slot> {
        self.order.first().copied()
    }

    fn last(&self) -> Option<Slot> {
        self.order.last().copied()
    }

    fn pop_first(&mut self) -> Option<Slot> {
        let slot = self.order.pop_first()?;
        self.index.remove(&slot.2);
        Some(slot)
    }
}

/// Bounded priority queue with an overflow set. Each key appears at most
/// once across both; overflow entries are admitted as space frees, best first.
///
/// Only the ready lane is capped at `capacity`. The overflow set is what keeps
/// dirty keys from being dropped, so it grows to at most one entry per distinct
/// dirty key (bounded by the tiles of the world), never per event.
#[derive(Debug)]
pub struct RenderQueue {
    capacity: usize,
    ready: Lane,
    parked: Lane,
    next_seq: u64,
}

impl RenderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ready: Lane::default(),
            parked: Lane::default(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries admitted to the bounded queue.
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.len() == 0 && self.parked.len() == 0
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.ready.contains(key) || self.parked.contains(key)
    }

    pub fn priority_of(&self, key: TileKey) -> Option<u8> {
        self.ready
            .index
            .get(&key)
            .or_else(|| self.parked.index.get(&key))
            .map(|&(p, _)| p)
    }

    pub fn push(&mut self, key: TileKey, priority: u8) -> EnqueueOutcome {
        if self.ready.contains(key) {
            self.ready.raise(key, priority);
            return EnqueueOutcome::Coalesced;
        }
        if self.parked.contains(key) {
            self.parked.raise(key, priority);
            self.rebalance();
            return EnqueueOutcome::Coalesced;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        if self.ready.len() < self.capacity {
            self.ready.insert(key, priority, seq);
            return EnqueueOutcome::Queued;
        }
        match self.ready.last() {
            Some((Reverse(lowest), lowest_seq, victim)) if priority > lowest => {
                self.ready.remove(victim);
                self.parked.insert(victim, lowest, lowest_seq);
                self.ready.insert(key, priority, seq);
                EnqueueOutcome::Displaced(victim)
            }
            _ => {
                self.parked.insert(key, priority, seq);
                EnqueueOutcome::Parked
            }
        }
    }

    pub fn pop(&mut self) -> Option<(TileKey, u8)> {
        let (Reverse(p), _, key) = self.ready.pop_first()?;
        self.rebalance();
        Some((key, p))
    }

    pub fn remove(&mut self, key: TileKey) -> bool {
        let found = self.ready.remove(key).is_some() || self.parked.remove(key).is_some();
        self.rebalance();
        found
    }

    fn rebalance(&mut self) {
        while let Some((Reverse(best), _, _)) = self.parked.first() {
            if self.ready.len() < self.capacity {
                if let Some((Reverse(p), seq, key)) = self.parked.pop_first() {
                    self.ready.insert(key, p, seq);
                }
                continue;
            }
            match self.ready.last() {
                Some((Reverse(lowest), lowest_seq, victim)) if best > lowest => {
                    self.ready.remove(victim);
                    self.parked.insert(victim, lowest, lowest_seq);
                    if let Some((Reverse(p), seq, key)) = self.parked.pop_first() {
                        self.ready.insert(key, p, seq);
                    }
                }
                _ => break,
            }
        }
    }
}
