//! Bounded lock-free MPMC ring, Vyukov array-queue protocol.
//!
//! Each slot carries a sequence counter. For a slot at ring index `i` on
//! lap `L` (absolute position `p = L * capacity + i`):
//!
//! - `seq == p` means the slot is free for the producer claiming `p`;
//! - `seq == p + 1` means the slot holds the value for the consumer
//!   claiming `p`;
//! - after consumption the consumer stores `seq = p + capacity`, freeing
//!   the slot for the next lap.
//!
//! `enqueue_pos` and `dequeue_pos` are cache-line isolated so producers
//! and consumers do not false-share. The uncontended paths are a single
//! CAS; batch enqueue claims a contiguous span with one CAS to amortize
//! it across coalesced messages.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{EnqueueError, FabricError, FabricResult};

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC queue over a power-of-two slot array.
pub struct Ring<T> {
    buf: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: slots transfer `T` by value between threads under the sequence
// protocol; a slot's value is accessed only by the unique claimant of its
// position, established by the CAS on enqueue_pos/dequeue_pos.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Create a ring with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::InvalidCapacity`] unless `capacity` is a
    /// power of two of at least 2.
    pub fn with_capacity(capacity: usize) -> FabricResult<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(FabricError::InvalidCapacity { got: capacity });
        }
        let buf = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Ok(Self {
            buf,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate occupancy. Exact only when quiescent.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    /// Whether the ring is (approximately) empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue one value. Lock-free; wait-free when uncontended.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] with the value when at capacity.
    pub fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buf[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos as isize;
            if dif == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS made this thread the unique
                        // claimant of position `pos`; no other thread
                        // touches the slot until seq advances below.
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.seq.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return Err(EnqueueError::Full(value));
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue a contiguous batch with a single position reservation.
    ///
    /// Slot availability is prefix-monotone (consumers free slots in
    /// position order), so checking the last slot of the span suffices.
    ///
    /// # Errors
    ///
    /// Returns the whole batch back when the span does not fit; a batch
    /// larger than the ring can never fit.
    pub fn try_enqueue_batch(&self, batch: Vec<T>) -> Result<(), EnqueueError<Vec<T>>> {
        let n = batch.len();
        if n == 0 {
            return Ok(());
        }
        if n > self.capacity() {
            return Err(EnqueueError::Full(batch));
        }
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let last = &self.buf[(pos + n - 1) & self.mask];
            let seq = last.seq.load(Ordering::Acquire);
            let dif = seq as isize - (pos + n - 1) as isize;
            if dif == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + n,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        for (i, value) in batch.into_iter().enumerate() {
                            let slot = &self.buf[(pos + i) & self.mask];
                            // SAFETY: the span [pos, pos + n) was claimed
                            // by the CAS above; each slot in it is owned
                            // by this thread until its seq is published.
                            unsafe {
                                (*slot.value.get()).write(value);
                            }
                            slot.seq.store(pos + i + 1, Ordering::Release);
                        }
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return Err(EnqueueError::Full(batch));
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue one value. Lock-free.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buf[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - (pos + 1) as isize;
            if dif == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS made this thread the unique
                        // claimant of position `pos`; the producer's
                        // Release store of seq == pos + 1 happens-before
                        // our Acquire load, so the value is initialized.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Drain remaining values so their destructors run.
        while self.try_dequeue().is_some() {}
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
