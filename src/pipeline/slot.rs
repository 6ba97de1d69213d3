//! Lock-free overwrite slot for the frame pipeline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Single-item overwrite cell shared between one pipeline stage and the next.
///
/// `put` swaps the new item in and drops whatever unread item was there;
/// `try_take` swaps the cell back to empty. Both are a single atomic pointer
/// swap, so a reader sees either the previous or the new item, never a mix,
/// and never an item older than the last completed `put`.
pub struct FrameSlot<T> {
    cell: ArcSwapOption<T>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    written: AtomicUsize,
    taken: AtomicUsize,
    overwritten: AtomicUsize,
}

/// Snapshot of slot counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub written: usize,
    pub taken: usize,
    /// Items replaced before anyone took them
    pub overwritten: usize,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: store an item, discarding any unread one.
    /// Returns `true` when an unread item was dropped.
    pub fn put(&self, item: T) -> bool {
        let previous = self.cell.swap(Some(Arc::new(item)));
        self.stats.written.fetch_add(1, Ordering::Relaxed);

        if previous.is_some() {
            self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Consumer: take the current item, leaving the slot empty
    pub fn try_take(&self) -> Option<Arc<T>> {
        let item = self.cell.swap(None)?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Discard any unread item. Returns `true` if one was present.
    pub fn clear(&self) -> bool {
        self.cell.swap(None).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.load().is_none()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            written: self.stats.written.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
            overwritten: self.stats.overwritten.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
