use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic version stamp source. Owned by whoever assigns stamps (the chunk
/// reader); never global.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose next stamp is strictly greater than `floor`. Used to resume
    /// after a restart so new stamps never collide with persisted tile versions.
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    #[inline]
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Raises the clock to at least `seen`.
    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }
}
