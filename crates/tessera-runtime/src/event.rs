use std::fmt;

use tessera_world::{ChunkCoord, RegionCoord};

/// Why a region needs another render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DirtyReason {
    /// A chunk was rewritten in storage.
    ChunkChanged(ChunkCoord),
    /// Storage reported a change somewhere in the region.
    RegionChanged,
    /// Startup scan found the tile missing or older than its chunks.
    Startup,
    /// A served tile was stale.
    StaleServed,
    /// Operator request.
    Manual,
}

impl DirtyReason {
    /// Priority used when the caller gives no hint.
    pub fn default_priority(self) -> u8 {
        match self {
            DirtyReason::Manual => 200,
            DirtyReason::ChunkChanged(_) => 128,
            DirtyReason::RegionChanged => 120,
            DirtyReason::StaleServed => 96,
            DirtyReason::Startup => 32,
        }
    }
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyReason::ChunkChanged(c) => write!(f, "chunk {c} changed"),
            DirtyReason::RegionChanged => f.write_str("region changed"),
            DirtyReason::Startup => f.write_str("startup"),
            DirtyReason::StaleServed => f.write_str("stale tile served"),
            DirtyReason::Manual => f.write_str("manual"),
        }
    }
}

/// One dirty notification. Higher `priority` renders first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRegionEvent {
    pub region: RegionCoord,
    pub reason: DirtyReason,
    pub priority: u8,
}

impl DirtyRegionEvent {
    pub fn new(region: RegionCoord, reason: DirtyReason) -> Self {
        Self {
            region,
            reason,
            priority: reason.default_priority(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Receiver of dirty-region notifications from storage watchers and other
/// collaborators.
pub trait ChangeSink: Send + Sync {
    fn notify_region_dirty(&self, region: RegionCoord, reason: DirtyReason);

    /// Like `notify_region_dirty`, keeping the event's priority where the
    /// sink can use it.
    fn notify_event(&self, event: DirtyRegionEvent) {
        self.notify_region_dirty(event.region, event.reason);
    }
}
