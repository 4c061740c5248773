use std::sync::atomic::{AtomicU64, Ordering};

/// Issues correlation numbers for multi-stage exchanges.
///
/// Values start at 1 and strictly increase for the lifetime of the allocator;
/// a `u64` does not wrap in any realistic connection lifetime.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    last: AtomicU64,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently issued value, or 0 if none was issued yet.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}
