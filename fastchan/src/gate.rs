//! Counting wait primitives used for queue backpressure.
//!
//! A [`WaitGate`] is a semaphore-like gate: [`acquire`](WaitGate::acquire)
//! blocks until a permit is available (or the gate is closed) and takes it,
//! [`release`](WaitGate::release) banks permits and wakes waiters.
//!
//! Gates are *advisory*. The queue never trusts a permit to mean "there is
//! definitely an item/slot for you"; it re-checks the ring after every wake.
//! That makes over-release harmless (a spurious wake costs one retry) and
//! lets the gate cap how many permits it banks.
//!
//! ```text
//! Semaphore::acquire
//! ├── Phase 1: CAS-decrement the permit counter       (~10-50 cycles)
//! ├── Phase 2: Backoff::snooze() x snooze_iters        (spin, then yield)
//! └── Phase 3: register an Unparker, park the thread   (syscall)
//!
//! Semaphore::release
//! └── add permits; lock + unpark ONLY if a waiter is registered
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::{Backoff, CachePadded};

use crate::trace::trace;

/// A counting wait primitive.
///
/// Implementations must tolerate over-release and may return from
/// `acquire` spuriously; callers always re-check their own condition.
pub trait WaitGate: Send + Sync {
    /// Creates a gate with no permits that banks at most `limit` permits.
    ///
    /// `snooze_iters` is the number of backoff rounds to burn before the
    /// gate commits to a blocking wait. Implementations that never block
    /// may ignore it.
    fn with_limit(limit: usize, snooze_iters: usize) -> Self
    where
        Self: Sized;

    /// Waits until a permit is taken or the gate is closed.
    fn acquire(&self);

    /// Like [`acquire`](Self::acquire), but gives up at `deadline`.
    ///
    /// Returns `false` if the deadline passed without a permit.
    fn acquire_until(&self, deadline: Instant) -> bool;

    /// Banks `count` permits and wakes waiters.
    fn release(&self, count: usize);

    /// Closes the gate. Every current and future wait returns immediately.
    fn close(&self);
}

/// The default gate: a counting semaphore with a spin-then-park strategy.
///
/// The permit counter is saturating. Once `limit` permits are banked,
/// further releases only wake waiters. A saturated gate always has a permit
/// for the next acquirer, so saturation can't lose a wake-up.
///
/// Parked threads sit in a FIFO list of [`Unparker`]s. `waiters` mirrors the
/// list length so `release` only takes the lock when somebody is parked.
pub struct Semaphore {
    permits: CachePadded<AtomicUsize>,
    waiters: CachePadded<AtomicUsize>,
    closed: AtomicBool,
    limit: usize,
    snooze_iters: usize,
    next_ticket: AtomicUsize,
    sleepers: Mutex<VecDeque<Sleeper>>,
}

/// A parked thread's wake handle.
struct Sleeper {
    ticket: usize,
    unparker: Unparker,
}

impl Semaphore {
    /// Attempts to take a permit without waiting.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        let mut cur = self.permits.load(Ordering::SeqCst);
        while cur > 0 {
            match self.permits.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Number of currently banked permits.
    #[inline]
    pub fn permits(&self) -> usize {
        self.permits.load(Ordering::Relaxed)
    }

    /// Returns `true` once [`close`](WaitGate::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    fn ready(&self) -> bool {
        self.try_acquire() || self.closed.load(Ordering::SeqCst)
    }

    fn wait(&self, deadline: Option<Instant>) -> bool {
        if self.ready() {
            return true;
        }

        let backoff = Backoff::new();
        for _ in 0..self.snooze_iters {
            backoff.snooze();
            if self.ready() {
                return true;
            }
        }

        self.park(deadline)
    }

    #[cold]
    fn park(&self, deadline: Option<Instant>) -> bool {
        let parker = Parker::new();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        loop {
            // Register before the final check. A release that lands after
            // the check sees `waiters > 0` and finds us in the list.
            self.register(ticket, parker.unparker().clone());
            if self.ready() {
                self.deregister(ticket);
                return true;
            }

            trace!(ticket, "gate: parking");
            match deadline {
                None => parker.park(),
                Some(deadline) => parker.park_deadline(deadline),
            }
            self.deregister(ticket);

            let woken = self.ready();
            trace!(ticket, woken, "gate: unparked");
            if woken {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
        }
    }

    fn sleepers(&self) -> MutexGuard<'_, VecDeque<Sleeper>> {
        self.sleepers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, ticket: usize, unparker: Unparker) {
        let mut sleepers = self.sleepers();
        sleepers.push_back(Sleeper { ticket, unparker });
        self.waiters.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes `ticket` from the list if a notifier hasn't already.
    fn deregister(&self, ticket: usize) {
        let mut sleepers = self.sleepers();
        if let Some(idx) = sleepers.iter().position(|s| s.ticket == ticket) {
            sleepers.remove(idx);
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[inline]
    fn notify(&self, all: bool) {
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut sleepers = self.sleepers();
        if all {
            self.waiters.fetch_sub(sleepers.len(), Ordering::SeqCst);
            for sleeper in sleepers.drain(..) {
                sleeper.unparker.unpark();
            }
        } else if let Some(sleeper) = sleepers.pop_front() {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            sleeper.unparker.unpark();
        }
    }
}

impl WaitGate for Semaphore {
    fn with_limit(limit: usize, snooze_iters: usize) -> Self {
        Self {
            permits: CachePadded::new(AtomicUsize::new(0)),
            waiters: CachePadded::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            limit: limit.max(1),
            snooze_iters,
            next_ticket: AtomicUsize::new(0),
            sleepers: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    fn acquire(&self) {
        self.wait(None);
    }

    #[inline]
    fn acquire_until(&self, deadline: Instant) -> bool {
        self.wait(Some(deadline))
    }

    fn release(&self, count: usize) {
        if count == 0 {
            return;
        }

        let mut cur = self.permits.load(Ordering::SeqCst);
        loop {
            let next = cur.saturating_add(count).min(self.limit);
            if next == cur {
                break;
            }
            match self.permits.compare_exchange_weak(
                cur,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }

        self.notify(count > 1);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Drain under the lock even with no waiters counted, so a thread
        // registering concurrently either is unparked here or sees `closed`.
        let mut sleepers = self.sleepers();
        self.waiters.fetch_sub(sleepers.len(), Ordering::SeqCst);
        for sleeper in sleepers.drain(..) {
            sleeper.unparker.unpark();
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.permits())
            .field("limit", &self.limit)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A gate that never blocks.
///
/// `acquire` yields the thread to the scheduler once and returns, so a
/// blocked `put`/`get` becomes a yield-and-retry loop. Trades CPU for the
/// absence of park/unpark syscalls.
#[derive(Debug, Default)]
pub struct Yielding {
    closed: AtomicBool,
}

impl WaitGate for Yielding {
    fn with_limit(_limit: usize, _snooze_iters: usize) -> Self {
        Self::default()
    }

    #[inline]
    fn acquire(&self) {
        if !self.closed.load(Ordering::Acquire) {
            thread::yield_now();
        }
    }

    #[inline]
    fn acquire_until(&self, deadline: Instant) -> bool {
        self.acquire();
        Instant::now() < deadline
    }

    #[inline]
    fn release(&self, _count: usize) {}

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn release_then_acquire_does_not_block() {
        let gate = Semaphore::with_limit(4, 0);
        gate.release(1);
        assert_eq!(gate.permits(), 1);
        gate.acquire();
        assert_eq!(gate.permits(), 0);
    }

    #[test]
    fn try_acquire_without_permits_fails() {
        let gate = Semaphore::with_limit(4, 0);
        assert!(!gate.try_acquire());
        gate.release(2);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn permits_saturate_at_limit() {
        let gate = Semaphore::with_limit(2, 0);
        for _ in 0..10 {
            gate.release(1);
        }
        assert_eq!(gate.permits(), 2);

        gate.release(usize::MAX);
        assert_eq!(gate.permits(), 2);
    }

    #[test]
    fn acquire_until_times_out() {
        let gate = Semaphore::with_limit(1, 2);
        let start = Instant::now();
        assert!(!gate.acquire_until(start + Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn parked_acquire_wakes_on_release() {
        let gate = Arc::new(Semaphore::with_limit(1, 0));
        let g = Arc::clone(&gate);

        let start = Instant::now();
        let handle = thread::spawn(move || g.acquire());

        thread::sleep(Duration::from_millis(50));
        gate.release(1);

        handle.join().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(gate.permits(), 0);
    }

    #[test]
    fn close_wakes_every_waiter() {
        let gate = Arc::new(Semaphore::with_limit(1, 0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = Arc::clone(&gate);
                thread::spawn(move || g.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        gate.close();

        for h in handles {
            h.join().unwrap();
        }
        assert!(gate.is_closed());
    }

    #[test]
    fn acquire_after_close_returns_immediately() {
        let gate = Semaphore::with_limit(1, 8);
        gate.close();
        gate.acquire();
        assert!(gate.acquire_until(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn no_lost_wakeup_under_churn() {
        const ROUNDS: usize = 10_000;
        let gate = Arc::new(Semaphore::with_limit(ROUNDS, 0));
        let g = Arc::clone(&gate);

        let consumer = thread::spawn(move || {
            for _ in 0..ROUNDS {
                g.acquire();
            }
        });

        for _ in 0..ROUNDS {
            gate.release(1);
        }

        consumer.join().unwrap();
    }

    #[test]
    fn each_release_wakes_one_parked_waiter() {
        const WAITERS: usize = 4;
        let gate = Arc::new(Semaphore::with_limit(WAITERS, 0));
        let woken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let g = Arc::clone(&gate);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    g.acquire();
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        for expected in 1..=WAITERS {
            gate.release(1);
            while woken.load(Ordering::SeqCst) < expected {
                thread::yield_now();
            }
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gate.permits(), 0);
        assert_eq!(gate.waiters.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timed_out_waiter_leaves_no_registration() {
        let gate = Semaphore::with_limit(1, 0);
        assert!(!gate.acquire_until(Instant::now() + Duration::from_millis(20)));
        assert_eq!(gate.waiters.load(Ordering::SeqCst), 0);
        assert!(gate.sleepers().is_empty());

        // A later release banks its permit instead of unparking a ghost.
        gate.release(1);
        assert_eq!(gate.permits(), 1);
    }

    #[test]
    fn yielding_gate_never_blocks() {
        let gate = Yielding::with_limit(4, 0);
        gate.acquire();
        gate.release(3);
        assert!(!gate.acquire_until(Instant::now()));
        assert!(gate.acquire_until(Instant::now() + Duration::from_secs(60)));
    }
}
