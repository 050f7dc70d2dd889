//! Unbounded lock-free MPMC queue.
//!
//! The classic two-pointer linked queue: `head` always points at a sentinel
//! whose successor holds the first unread value, and `tail` points at the
//! last node or lags at most a few nodes behind it. Any thread that finds
//! `tail` lagging swings it forward before doing its own work (helping), so
//! a stalled producer never blocks the others.
//!
//! ```text
//!  head                         tail
//!   │                            │
//!   ▼                            ▼
//! ┌──────────┐   ┌──────┐   ┌──────┐
//! │ sentinel │──>│  v0  │──>│  v1  │──> null
//! └──────────┘   └──────┘   └──────┘
//! ```
//!
//! Popping swings `head` to the first value node, which becomes the new
//! sentinel once its value has been moved out. Unlinked nodes are reclaimed
//! through `crossbeam-epoch`: a node is freed only after every thread that
//! could still be reading it has unpinned.
//!
//! There is no blocking; a consumer that needs to wait polls [`pop`] itself.
//!
//! [`pop`]: UnboundedQueue::pop
//!
//! # Example
//!
//! ```
//! use fastchan::UnboundedQueue;
//!
//! let q = UnboundedQueue::new();
//! q.push(1);
//! q.push(2);
//!
//! assert_eq!(q.pop(), Some(1));
//! assert_eq!(q.pop(), Some(2));
//! assert_eq!(q.pop(), None);
//! ```

use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

struct Node<T> {
    /// Uninitialized in the sentinel. A value node's payload is moved out
    /// when it becomes the sentinel, so dropping a node never drops `T`.
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// An unbounded lock-free FIFO queue.
pub struct UnboundedQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

// Safety: values cross threads by move only; all shared pointers are
// accessed atomically and reclaimed through epochs.
unsafe impl<T: Send> Send for UnboundedQueue<T> {}
unsafe impl<T: Send> Sync for UnboundedQueue<T> {}

impl<T> UnboundedQueue<T> {
    /// Creates an empty queue holding only the sentinel node.
    pub fn new() -> Self {
        let q = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
        };
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        // Safety: the queue isn't shared yet.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = sentinel.into_shared(guard);
            q.head.store(sentinel, Ordering::Relaxed);
            q.tail.store(sentinel, Ordering::Relaxed);
        }
        q
    }

    /// Appends `value` at the tail.
    pub fn push(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: pinned, and `tail` is never null after construction.
            let tail_ref = unsafe { tail.deref() };

            match tail_ref.next.compare_exchange(
                Shared::null(),
                new,
                Ordering::Release,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    // Best effort: whoever sees the lag next will fix it.
                    let _ = self.tail.compare_exchange(
                        tail,
                        new,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    return;
                }
                Err(e) => {
                    // `tail` lags; swing it to the node that beat us.
                    let _ = self.tail.compare_exchange(
                        tail,
                        e.current,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                }
            }
        }
    }

    /// Removes the value at the head, or returns `None` if the queue is
    /// empty.
    ///
    /// A push that is still linking its node may be missed; callers that
    /// wait for data simply retry.
    pub fn pop(&self) -> Option<T> {
        self.pop_with(&epoch::pin())
    }

    fn pop_with(&self, guard: &Guard) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: pinned, and `head` is never null after construction.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

            if head == tail {
                if next.is_null() {
                    return None;
                }
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            // Safety: pinned; a non-null successor stays allocated until we
            // unpin.
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                continue;
            };

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                // Safety: winning the head CAS makes `next` the new sentinel
                // and us the only owner of its payload. The old sentinel is
                // unreachable for new readers.
                unsafe {
                    let value = next_ref.value.assume_init_read();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }
        }
    }

    /// Returns `true` if no value was linked after the sentinel at the time
    /// of the call.
    ///
    /// Advisory under concurrency.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // Safety: pinned, head is never null.
        unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .is_null()
    }
}

impl<T> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for UnboundedQueue<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no other thread holds a reference.
        unsafe {
            let guard = epoch::unprotected();
            while self.pop_with(guard).is_some() {}

            let sentinel = self.head.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

impl<T> fmt::Debug for UnboundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedQueue")
            .field("empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn basic_fifo() {
        let q = UnboundedQueue::new();
        for i in 0..1000 {
            q.push(i);
        }
        for i in 0..1000 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn empty_pop_is_not_found() {
        let q = UnboundedQueue::<u64>::new();
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);

        q.push(1);
        assert!(!q.is_empty());
        assert_eq!(q.pop(), Some(1));
        assert!(q.is_empty());
    }

    #[test]
    fn interleaved_push_pop() {
        let q = UnboundedQueue::new();
        for round in 0..100u64 {
            q.push(round * 2);
            q.push(round * 2 + 1);
            assert_eq!(q.pop(), Some(round * 2));
            assert_eq!(q.pop(), Some(round * 2 + 1));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn concurrent_single_producer_order() {
        const N: u64 = 100_000;
        let q = Arc::new(UnboundedQueue::new());

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..N {
                    q.push(i);
                }
            })
        };

        let mut expected = 0;
        while expected < N {
            match q.pop() {
                Some(v) => {
                    assert_eq!(v, expected, "FIFO order violated");
                    expected += 1;
                }
                None => std::hint::spin_loop(),
            }
        }

        producer.join().unwrap();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn multi_producer_preserves_per_producer_order() {
        const N: usize = 200_000;
        const STRIDE: usize = 10;
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .clamp(2, STRIDE);

        let q = Arc::new(UnboundedQueue::new());
        let done = Arc::new(AtomicUsize::new(0));
        let popped = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for g in 0..threads {
            let q = Arc::clone(&q);
            let done = Arc::clone(&done);
            handles.push(thread::spawn(move || {
                for i in (0..N).step_by(STRIDE) {
                    q.push(i + g);
                }
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..threads {
            let q = Arc::clone(&q);
            let done = Arc::clone(&done);
            let popped = Arc::clone(&popped);
            consumers.push(thread::spawn(move || {
                let mut lasts: HashMap<usize, usize> = HashMap::new();
                loop {
                    match q.pop() {
                        Some(item) => {
                            popped.fetch_add(1, Ordering::SeqCst);
                            let producer = item % STRIDE;
                            if let Some(&last) = lasts.get(&producer) {
                                assert!(last < item, "producer {producer}: {last} then {item}");
                            }
                            lasts.insert(producer, item);
                        }
                        None => {
                            if done.load(Ordering::SeqCst) == threads && q.is_empty() {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
            }));
        }

        for h in handles.into_iter().chain(consumers) {
            h.join().unwrap();
        }
        assert_eq!(popped.load(Ordering::SeqCst), threads * N / STRIDE);
    }

    #[test]
    fn remaining_values_dropped_with_queue() {
        let drop_count = Arc::new(AtomicUsize::new(0));

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let q = UnboundedQueue::new();
        for _ in 0..5 {
            q.push(DropCounter(Arc::clone(&drop_count)));
        }
        drop(q.pop());
        assert_eq!(drop_count.load(Ordering::SeqCst), 1);

        drop(q);
        assert_eq!(drop_count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn zero_sized_type() {
        let q = UnboundedQueue::new();
        q.push(());
        q.push(());
        assert_eq!(q.pop(), Some(()));
        assert_eq!(q.pop(), Some(()));
        assert_eq!(q.pop(), None);
    }
}
