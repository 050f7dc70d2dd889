//! The sequenced slot ring behind [`BoundedQueue`](super::BoundedQueue).
//!
//! Each slot carries a sequence number that is the *only* synchronization
//! token for its payload:
//!
//! ```text
//! sequence == p              free, next producer to claim position p owns it
//! sequence == p + 1          filled, next consumer to claim position p owns it
//! sequence == p + ring_len   recycled, free again for position p + ring_len
//! ```
//!
//! Producers race on `write` with CAS, consumers race on `read` with CAS.
//! Exactly one thread wins each position. The winner then has exclusive
//! access to the slot until it publishes the next sequence value with a
//! `Release` store, which a later `Acquire` load on the other side pairs with.
//!
//! Memory layout:
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ write (cache-line padded) - producer claim position   │
//! ├───────────────────────────────────────────────────────┤
//! │ read (cache-line padded) - consumer claim position    │
//! ├───────────────────────────────────────────────────────┤
//! │ meta (cache-line padded) - mask, capacity, closed     │
//! ├───────────────────────────────────────────────────────┤
//! │ slots -> heap: Slot[0] { sequence, data } ...         │
//! └───────────────────────────────────────────────────────┘
//! ```

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::trace::debug;

/// One cell of the ring.
pub(crate) struct Slot<T> {
    pub(crate) sequence: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(sequence: u64) -> Self {
        Self {
            sequence: AtomicU64::new(sequence),
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Read-mostly fields, kept off the cursor cache lines.
struct Meta {
    mask: u64,
    capacity: u64,
    closed: AtomicBool,
}

pub(crate) struct Ring<T> {
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    meta: CachePadded<Meta>,
    slots: Box<[Slot<T>]>,
}

// Safety: a slot's payload is only touched by the single thread that won
// the cursor CAS for its position, and hand-off between threads goes
// through the slot's Release/Acquire sequence.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Allocates a ring holding at most `capacity` items.
    ///
    /// `capacity` must already be a power of two. A capacity of one runs
    /// on two slots: with a single slot, "filled at p" and "free at p + 1"
    /// would be the same sequence value.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());

        let ring_len = capacity.max(2);
        let slots = (0..ring_len as u64).map(Slot::new).collect();

        Self {
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            meta: CachePadded::new(Meta {
                mask: ring_len as u64 - 1,
                capacity: capacity as u64,
                closed: AtomicBool::new(false),
            }),
            slots,
        }
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos & self.meta.mask) as usize]
    }

    #[inline]
    fn lap(&self) -> u64 {
        self.slots.len() as u64
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.meta.capacity as usize
    }

    #[inline]
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) fn ring_len(&self) -> usize {
        self.slots.len()
    }

    /// Only a capacity-one ring is narrower than its slot array, and only
    /// there does the occupancy need checking against the read cursor.
    #[inline]
    fn has_room(&self, pos: u64) -> bool {
        self.meta.capacity == self.lap()
            || pos.wrapping_sub(self.read.load(Ordering::Acquire)) < self.meta.capacity
    }

    /// Claims the next write position and publishes `value` into it.
    ///
    /// Lost CAS races are retried here. `Err(value)` means the slot at the
    /// write cursor has not been drained yet, i.e. the ring is full.
    pub(crate) fn try_push(&self, value: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut pos = self.write.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(pos);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as i64;

            if diff == 0 {
                if !self.has_room(pos) {
                    return Err(value);
                }
                match self.write.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS for `pos` gives exclusive
                        // access to the slot until the sequence is published.
                        unsafe { (*slot.data.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                // Still holding the item from the previous lap.
                return Err(value);
            } else {
                // Another producer already took `pos`.
                pos = self.write.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Claims the next read position and takes its item.
    ///
    /// Returns `None` if the slot at the read cursor is not published yet,
    /// either because the ring is empty or because its producer is still
    /// between claim and publish.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut pos = self.read.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(pos);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i64;

            if diff == 0 {
                match self.read.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: sequence == pos + 1 means the payload was
                        // published, and winning the CAS makes us its only
                        // reader.
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.lap()), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.read.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Instantaneous item count, clamped to capacity.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        // Read first: write only grows, so the difference can't underflow.
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.meta.capacity) as usize
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.meta.closed.load(Ordering::Acquire)
    }

    /// Sets the closed flag. Returns `false` if it was already set.
    #[inline]
    pub(crate) fn close(&self) -> bool {
        !self.meta.closed.swap(true, Ordering::AcqRel)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let read = *self.read.get_mut();
        let write = *self.write.get_mut();
        let mask = self.meta.mask;

        let mut dropped = 0usize;
        let mut pos = read;
        while pos != write {
            let slot = &mut self.slots[(pos & mask) as usize];
            if *slot.sequence.get_mut() == pos.wrapping_add(1) {
                // Safety: published and never consumed.
                unsafe { slot.data.get_mut().assume_init_drop() };
                dropped += 1;
            }
            pos = pos.wrapping_add(1);
        }

        if dropped > 0 {
            debug!(dropped, "ring dropped with unconsumed items");
        }
    }
}
