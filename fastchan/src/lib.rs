//! # fastchan
//!
//! Inter-thread queues for passing values between worker threads faster
//! than a generic locked queue.
//!
//! ## Queues
//!
//! - [`BoundedQueue`]: fixed-capacity MPMC ring buffer. Lock-free on the
//!   data path; blocks producers only when full and consumers only when
//!   empty, through a pluggable [`WaitGate`].
//! - [`UnboundedQueue`]: lock-free linked MPMC queue with no capacity limit
//!   and no blocking. Callers poll.
//!
//! ## Design Goals
//!
//! - No locks on the item path: every shared field changes through atomic
//!   loads, stores and CAS
//! - Cache-line isolation of the producer cursor, the consumer cursor and
//!   the read-mostly configuration
//! - No allocations after construction (bounded queue)
//! - Blocking that only costs a syscall when a thread is actually asleep
//!
//! ## Example
//!
//! ```
//! use fastchan::BoundedQueue;
//!
//! // Capacity is rounded up to the next power of two
//! let q = BoundedQueue::new(2);
//!
//! q.put(1).unwrap();
//! if q.try_put(2).is_ok() {
//!     println!("Success!");
//! }
//!
//! assert_eq!(q.get().unwrap(), 1);
//! assert_eq!(q.get().unwrap(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

mod bounded;
pub mod error;
pub mod gate;
mod trace;
mod unbounded;

pub use bounded::BoundedQueue;
pub use error::{GetError, GetTimeoutError, PutError, PutTimeoutError, TryGetError, TryPutError};
pub use gate::{Semaphore, WaitGate, Yielding};
pub use trace::init_tracing;
pub use unbounded::UnboundedQueue;

/// Default number of backoff snooze rounds a blocked `put`/`get` spends
/// before parking its thread.
///
/// Each round is a `crossbeam_utils::Backoff::snooze()`, which spins first
/// and eventually yields to the OS scheduler.
pub const DEFAULT_SNOOZE_ITERS: usize = 8;
