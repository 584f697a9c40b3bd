//! Epoch-reclaimed arena with index-based handles.
//!
//! Backs the bulk spill tier: values parked here survive ring overflow
//! without touching the hot rings. Allocation is bump-then-freelist; a
//! released slot enters limbo stamped with the current epoch and is only
//! recycled once every registered reader's epoch has advanced past the
//! release point. Readers that hold a borrowed reference therefore never
//! see a slot recycled under them, at the cost of memory proportional to
//! the slowest reader's lag.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Reader epoch value meaning "not currently reading".
const IDLE: u64 = u64::MAX;

/// Index-based handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle(u32);

struct ReaderSlot {
    epoch: Arc<AtomicU64>,
}

/// Fixed-capacity arena of `T` values.
pub struct Arena<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    bump: AtomicUsize,
    free: Mutex<Vec<u32>>,
    limbo: Mutex<VecDeque<(u32, u64)>>,
    global_epoch: AtomicU64,
    readers: Mutex<Vec<ReaderSlot>>,
}

// SAFETY: a slot is written only by the unique holder of its handle
// (insert claims an index no other thread holds; take consumes it) and
// read through `get` only while the handle is live; the epoch protocol
// prevents recycling a slot while any registered reader may still hold a
// reference obtained from it.
unsafe impl<T: Send> Send for Arena<T> {}
unsafe impl<T: Send + Sync> Sync for Arena<T> {}

impl<T> Arena<T> {
    /// Create an arena with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            bump: AtomicUsize::new(0),
            free: Mutex::new(Vec::new()),
            limbo: Mutex::new(VecDeque::new()),
            global_epoch: AtomicU64::new(1),
            readers: Mutex::new(Vec::new()),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Register a reader whose epoch gates slot recycling.
    #[must_use]
    pub fn register_reader(&self) -> EpochGuard {
        let epoch = Arc::new(AtomicU64::new(IDLE));
        self.lock_readers().push(ReaderSlot {
            epoch: Arc::clone(&epoch),
        });
        EpochGuard { epoch }
    }

    /// Store a value, returning its handle, or the value back when the
    /// arena is full. Recycled slots are preferred over fresh ones.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` when no slot is available.
    pub fn insert(&self, value: T) -> Result<ArenaHandle, T> {
        let index = if let Some(index) = self.lock_free().pop() {
            index
        } else {
            let next = self.bump.fetch_add(1, Ordering::Relaxed);
            if next >= self.slots.len() {
                // Bump frontier exhausted; undo and try reclaiming limbo.
                self.bump.fetch_sub(1, Ordering::Relaxed);
                self.reclaim();
                match self.lock_free().pop() {
                    Some(index) => index,
                    None => return Err(value),
                }
            } else {
                #[allow(clippy::cast_possible_truncation)]
                {
                    next as u32
                }
            }
        };
        // SAFETY: `index` came off the freelist or the bump frontier, so
        // this thread is the slot's unique owner until the handle is
        // published by returning it.
        unsafe {
            *self.slots[index as usize].get() = Some(value);
        }
        Ok(ArenaHandle(index))
    }

    /// Borrow the value behind a handle. Call only between
    /// [`EpochGuard::pin`] and [`EpochGuard::unpin`] so the slot cannot be
    /// recycled while the borrow lives.
    #[must_use]
    pub fn get(&self, handle: ArenaHandle) -> Option<&T> {
        // SAFETY: the handle holder has exclusive write ownership, and
        // recycling is gated on reader epochs; a pinned reader observes
        // either the live value or None, never a torn write.
        unsafe { (*self.slots[handle.0 as usize].get()).as_ref() }
    }

    /// Remove the value, placing the slot in limbo for epoch-gated reuse.
    #[must_use]
    pub fn take(&self, handle: ArenaHandle) -> Option<T> {
        // SAFETY: take consumes the handle's ownership; no other thread
        // writes this slot, and readers are gated by epochs.
        let value = unsafe { (*self.slots[handle.0 as usize].get()).take() };
        if value.is_some() {
            let released_at = self.global_epoch.fetch_add(1, Ordering::AcqRel);
            self.lock_limbo().push_back((handle.0, released_at));
        }
        value
    }

    /// Move limbo slots whose release epoch every reader has passed onto
    /// the freelist. Called opportunistically; cheap when limbo is empty.
    pub fn reclaim(&self) {
        let min_reader = self
            .lock_readers()
            .iter()
            .map(|reader| reader.epoch.load(Ordering::Acquire))
            .min()
            .unwrap_or(IDLE);
        let mut limbo = self.lock_limbo();
        let mut free = self.lock_free();
        while let Some(&(index, released_at)) = limbo.front() {
            // A slot is reusable once all reader epochs have advanced past
            // its release point; idle readers pass everything.
            if released_at < min_reader {
                free.push(index);
                limbo.pop_front();
            } else {
                break;
            }
        }
    }

    /// Slots currently waiting for reader epochs to pass.
    #[must_use]
    pub fn limbo_len(&self) -> usize {
        self.lock_limbo().len()
    }

    /// Current global epoch, advanced on every release.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<u32>> {
        self.free.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_limbo(&self) -> std::sync::MutexGuard<'_, VecDeque<(u32, u64)>> {
        self.limbo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_readers(&self) -> std::sync::MutexGuard<'_, Vec<ReaderSlot>> {
        self.readers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("limbo", &self.limbo_len())
            .finish()
    }
}

/// A registered reader's epoch cell.
///
/// Pin before dereferencing handles, unpin after; while pinned, no slot
/// released at or after the pinned epoch will be recycled.
#[derive(Debug)]
pub struct EpochGuard {
    epoch: Arc<AtomicU64>,
}

impl EpochGuard {
    /// Enter a read region at the given arena's current epoch.
    pub fn pin<T>(&self, arena: &Arena<T>) {
        self.epoch.store(arena.epoch(), Ordering::Release);
    }

    /// Leave the read region; all borrows must be dropped first.
    pub fn unpin(&self) {
        self.epoch.store(IDLE, Ordering::Release);
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        self.epoch.store(IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_take_round_trip() {
        let arena = Arena::with_capacity(4);
        let handle = arena.insert("hello").unwrap();
        assert_eq!(arena.get(handle), Some(&"hello"));
        assert_eq!(arena.take(handle), Some("hello"));
        assert_eq!(arena.take(handle), None);
    }

    #[test]
    fn test_full_arena_rejects() {
        let arena = Arena::with_capacity(2);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        assert_eq!(arena.insert(3), Err(3));
    }

    #[test]
    fn test_slots_recycle_without_readers() {
        let arena = Arena::with_capacity(2);
        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();
        assert_eq!(arena.take(a), Some(1));
        assert_eq!(arena.take(b), Some(2));
        // No registered readers: limbo reclaims immediately on demand.
        arena.insert(3).unwrap();
        arena.insert(4).unwrap();
        assert!(arena.insert(5).is_err());
    }

    #[test]
    fn test_pinned_reader_blocks_recycling() {
        let arena = Arena::with_capacity(1);
        let reader = arena.register_reader();

        let handle = arena.insert(10).unwrap();
        reader.pin(&arena);
        assert_eq!(arena.get(handle), Some(&10));
        assert_eq!(arena.take(handle), Some(10));

        // Reader still pinned at the pre-release epoch: the slot must not
        // be handed out again.
        arena.reclaim();
        assert_eq!(arena.limbo_len(), 1);
        assert!(arena.insert(11).is_err());

        reader.unpin();
        arena.reclaim();
        assert_eq!(arena.limbo_len(), 0);
        arena.insert(12).unwrap();
    }

    #[test]
    fn test_dropped_reader_stops_gating() {
        let arena = Arena::with_capacity(1);
        let reader = arena.register_reader();
        reader.pin(&arena);
        let handle = arena.insert(1).unwrap();
        assert_eq!(arena.take(handle), Some(1));
        drop(reader);
        arena.insert(2).unwrap();
    }

    #[test]
    fn test_freelist_preferred_over_bump() {
        let arena = Arena::with_capacity(8);
        let first = arena.insert(1).unwrap();
        assert_eq!(arena.take(first), Some(1));
        arena.reclaim();
        let second = arena.insert(2).unwrap();
        assert_eq!(second, first);
    }
}
