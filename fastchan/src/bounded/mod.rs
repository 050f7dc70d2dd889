//! Fixed-capacity multi-producer multi-consumer queue with blocking
//! backpressure.
//!
//! The data path is lock-free: producers and consumers claim positions with
//! a CAS on their cursor and hand items over through per-slot sequence
//! numbers (see the `ring` module). Blocking is layered on top with two
//! [`WaitGate`]s:
//!
//! ```text
//! put():  try_push ──ok──> filled.release(1)
//!            │ full
//!            └──> free.acquire() ──> retry
//!
//! get():  try_pop ──ok──> free.release(1)
//!            │ empty
//!            └──> filled.acquire() ──> retry
//! ```
//!
//! A release always follows the state change it announces, and gates bank
//! permits, so a waiter can't miss a wake-up that happened before it parked.
//!
//! # Example
//!
//! ```
//! use fastchan::BoundedQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let q = Arc::new(BoundedQueue::new(2));
//!
//! let producer = {
//!     let q = Arc::clone(&q);
//!     thread::spawn(move || {
//!         for i in 0..100u64 {
//!             q.put(i).unwrap();
//!         }
//!     })
//! };
//!
//! for i in 0..100u64 {
//!     assert_eq!(q.get().unwrap(), i);
//! }
//! producer.join().unwrap();
//! ```

mod ring;

use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

use crate::DEFAULT_SNOOZE_ITERS;
use crate::error::{GetError, GetTimeoutError, PutError, PutTimeoutError, TryGetError, TryPutError};
use crate::gate::{Semaphore, WaitGate};
use crate::trace::debug;

use ring::Ring;

/// A bounded MPMC queue.
///
/// All operations take `&self`; share the queue between threads with an
/// [`Arc`](std::sync::Arc). Items come out in the order their producers
/// claimed positions.
///
/// `G` picks the blocking strategy used when the queue is full or empty.
/// It defaults to [`Semaphore`] (spin, then park).
pub struct BoundedQueue<T, G: WaitGate = Semaphore> {
    ring: Ring<T>,
    /// Signalled by consumers, waited on by producers.
    free: CachePadded<G>,
    /// Signalled by producers, waited on by consumers.
    filled: CachePadded<G>,
}

impl<T> BoundedQueue<T, Semaphore> {
    /// Creates a queue holding up to `size` items, rounded up to the next
    /// power of two.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    ///
    /// # Example
    ///
    /// ```
    /// use fastchan::BoundedQueue;
    ///
    /// let q = BoundedQueue::<u32>::new(3);
    /// assert_eq!(q.cap(), 4);
    /// ```
    pub fn new(size: usize) -> Self {
        Self::with_gate(size, DEFAULT_SNOOZE_ITERS)
    }

    /// Creates a queue with a custom number of backoff rounds before a
    /// blocked `put`/`get` parks its thread.
    ///
    /// Higher values burn more CPU but cut wake-up latency for bursty
    /// workloads; `0` parks right after the first failed attempt.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn with_config(size: usize, snooze_iters: usize) -> Self {
        Self::with_gate(size, snooze_iters)
    }
}

impl<T, G: WaitGate> BoundedQueue<T, G> {
    /// Creates a queue that blocks through the gate type `G`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    ///
    /// # Example
    ///
    /// ```
    /// use fastchan::{BoundedQueue, Yielding};
    ///
    /// let q = BoundedQueue::<u64, Yielding>::with_gate(1024, 0);
    /// q.put(1).unwrap();
    /// assert_eq!(q.get().unwrap(), 1);
    /// ```
    pub fn with_gate(size: usize, snooze_iters: usize) -> Self {
        assert!(size > 0, "queue size must be at least 1");

        let capacity = size.next_power_of_two();
        let ring = Ring::new(capacity);
        debug!(capacity, ring_len = ring.ring_len(), "bounded queue created");

        Self {
            ring,
            free: CachePadded::new(G::with_limit(capacity, snooze_iters)),
            filled: CachePadded::new(G::with_limit(capacity, snooze_iters)),
        }
    }

    /// Adds `item` to the queue, waiting for a free slot if it is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(PutError(item))` if the queue is closed, including when
    /// it is closed while this call is waiting.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        let mut item = item;
        loop {
            if self.ring.is_closed() {
                return Err(PutError(item));
            }
            match self.ring.try_push(item) {
                Ok(()) => {
                    self.filled.release(1);
                    return Ok(());
                }
                Err(v) => item = v,
            }
            self.free.acquire();
        }
    }

    /// Adds `item` to the queue if a slot is free, without waiting.
    ///
    /// # Errors
    ///
    /// - `TryPutError::Full(item)` if every slot is occupied
    /// - `TryPutError::Disposed(item)` if the queue is closed
    ///
    /// # Example
    ///
    /// ```
    /// use fastchan::{BoundedQueue, TryPutError};
    ///
    /// let q = BoundedQueue::new(2);
    /// q.put(1).unwrap();
    /// q.put(2).unwrap();
    /// assert!(matches!(q.try_put(3), Err(TryPutError::Full(3))));
    ///
    /// assert_eq!(q.get().unwrap(), 1);
    /// assert!(q.try_put(3).is_ok());
    /// ```
    pub fn try_put(&self, item: T) -> Result<(), TryPutError<T>> {
        if self.ring.is_closed() {
            return Err(TryPutError::Disposed(item));
        }
        match self.ring.try_push(item) {
            Ok(()) => {
                self.filled.release(1);
                Ok(())
            }
            Err(v) => Err(TryPutError::Full(v)),
        }
    }

    /// Like [`put`](Self::put), but gives up once `timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// - `PutTimeoutError::Timeout(item)` if no slot freed up in time
    /// - `PutTimeoutError::Disposed(item)` if the queue is closed
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutTimeoutError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut item = item;
        loop {
            if self.ring.is_closed() {
                return Err(PutTimeoutError::Disposed(item));
            }
            match self.ring.try_push(item) {
                Ok(()) => {
                    self.filled.release(1);
                    return Ok(());
                }
                Err(v) => item = v,
            }
            if !wait(&*self.free, deadline) {
                return Err(PutTimeoutError::Timeout(item));
            }
        }
    }

    /// Removes the oldest item, waiting for one if the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns `Err(GetError)` if the queue is closed, including when it is
    /// closed while this call is waiting. Items still buffered in a closed
    /// queue are not handed out; they are dropped with the queue.
    pub fn get(&self) -> Result<T, GetError> {
        loop {
            if self.ring.is_closed() {
                return Err(GetError);
            }
            if let Some(v) = self.ring.try_pop() {
                self.free.release(1);
                return Ok(v);
            }
            self.filled.acquire();
        }
    }

    /// Removes the oldest item if one is available, without waiting.
    ///
    /// # Errors
    ///
    /// - `TryGetError::Empty` if no published item is available
    /// - `TryGetError::Disposed` if the queue is closed
    pub fn try_get(&self) -> Result<T, TryGetError> {
        if self.ring.is_closed() {
            return Err(TryGetError::Disposed);
        }
        match self.ring.try_pop() {
            Some(v) => {
                self.free.release(1);
                Ok(v)
            }
            None => Err(TryGetError::Empty),
        }
    }

    /// Like [`get`](Self::get), but gives up once `timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// - `GetTimeoutError::Timeout` if nothing arrived in time
    /// - `GetTimeoutError::Disposed` if the queue is closed
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, GetTimeoutError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.ring.is_closed() {
                return Err(GetTimeoutError::Disposed);
            }
            if let Some(v) = self.ring.try_pop() {
                self.free.release(1);
                return Ok(v);
            }
            if !wait(&*self.filled, deadline) {
                return Err(GetTimeoutError::Timeout);
            }
        }
    }

    /// Closes the queue.
    ///
    /// Every later `put`/`get` fails with a disposed error, and every thread
    /// currently waiting inside one is woken to fail the same way. Closing
    /// twice is a no-op.
    pub fn close(&self) {
        if self.ring.close() {
            debug!(len = self.ring.len(), "bounded queue closed");
            self.free.close();
            self.filled.close();
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    /// Number of items in the queue.
    ///
    /// Under concurrent access this is a snapshot that may be stale by the
    /// time it is returned; use it for monitoring, not for control flow.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if the queue held no items at the time of the call.
    ///
    /// Advisory, like [`len`](Self::len).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items the queue holds.
    ///
    /// The requested size rounded up to a power of two.
    #[inline]
    pub fn cap(&self) -> usize {
        self.ring.capacity()
    }
}

/// Waits on `gate` until `deadline`. A `None` deadline is past what
/// `Instant` can represent and waits without one.
#[inline]
fn wait<G: WaitGate>(gate: &G, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => gate.acquire_until(deadline),
        None => {
            gate.acquire();
            true
        }
    }
}

impl<T, G: WaitGate> fmt::Debug for BoundedQueue<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("cap", &self.cap())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
