//! Error types returned by [`BoundedQueue`](crate::BoundedQueue).
//!
//! Contention is never an error; lost races are retried internally. The only
//! conditions that cross the API are a disposed (closed) queue, a full or
//! empty queue on the non-blocking paths, and an elapsed deadline on the
//! timed paths. Errors from the put side hand the rejected item back.

use std::fmt;

use thiserror::Error;

/// Error returned by [`BoundedQueue::put`](crate::BoundedQueue::put) when
/// the queue has been closed.
///
/// Contains the item that could not be enqueued.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("put on a disposed queue")]
pub struct PutError<T>(pub T);

impl<T> PutError<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PutError(..)")
    }
}

/// Error returned by [`BoundedQueue::get`](crate::BoundedQueue::get) when
/// the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("get on a disposed queue")]
pub struct GetError;

/// Error returned by [`BoundedQueue::try_put`](crate::BoundedQueue::try_put).
#[derive(Clone, Copy, PartialEq, Eq, Error)]
pub enum TryPutError<T> {
    /// Every slot is occupied. Contains the item that couldn't be enqueued.
    #[error("queue is full")]
    Full(T),
    /// The queue has been closed. Contains the item that couldn't be enqueued.
    #[error("put on a disposed queue")]
    Disposed(T),
}

impl<T> TryPutError<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(v) | Self::Disposed(v) => v,
        }
    }

    /// Returns `true` if this error is the `Full` variant.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` if this error is the `Disposed` variant.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed(_))
    }
}

impl<T> fmt::Debug for TryPutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Disposed(_) => f.write_str("Disposed(..)"),
        }
    }
}

/// Error returned by [`BoundedQueue::try_get`](crate::BoundedQueue::try_get).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryGetError {
    /// No published item is available right now.
    #[error("queue is empty")]
    Empty,
    /// The queue has been closed.
    #[error("get on a disposed queue")]
    Disposed,
}

impl TryGetError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Disposed` variant.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

/// Error returned by [`BoundedQueue::put_timeout`](crate::BoundedQueue::put_timeout).
#[derive(Clone, Copy, PartialEq, Eq, Error)]
pub enum PutTimeoutError<T> {
    /// No slot freed up before the deadline.
    #[error("timed out waiting for a free slot")]
    Timeout(T),
    /// The queue has been closed.
    #[error("put on a disposed queue")]
    Disposed(T),
}

impl<T> PutTimeoutError<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(v) | Self::Disposed(v) => v,
        }
    }

    /// Returns `true` if this error is the `Timeout` variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns `true` if this error is the `Disposed` variant.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed(_))
    }
}

impl<T> fmt::Debug for PutTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("Timeout(..)"),
            Self::Disposed(_) => f.write_str("Disposed(..)"),
        }
    }
}

/// Error returned by [`BoundedQueue::get_timeout`](crate::BoundedQueue::get_timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GetTimeoutError {
    /// No item was published before the deadline.
    #[error("timed out waiting for an item")]
    Timeout,
    /// The queue has been closed.
    #[error("get on a disposed queue")]
    Disposed,
}

impl GetTimeoutError {
    /// Returns `true` if this error is the `Timeout` variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if this error is the `Disposed` variant.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_side_errors_return_the_item() {
        assert_eq!(PutError(7).into_inner(), 7);
        assert_eq!(TryPutError::Full(1).into_inner(), 1);
        assert_eq!(TryPutError::Disposed(2).into_inner(), 2);
        assert_eq!(PutTimeoutError::Timeout(3).into_inner(), 3);
        assert_eq!(PutTimeoutError::Disposed(4).into_inner(), 4);
    }

    #[test]
    fn predicates() {
        assert!(TryPutError::Full(()).is_full());
        assert!(TryPutError::Disposed(()).is_disposed());
        assert!(TryGetError::Empty.is_empty());
        assert!(TryGetError::Disposed.is_disposed());
        assert!(PutTimeoutError::Timeout(()).is_timeout());
        assert!(GetTimeoutError::Disposed.is_disposed());
    }

    #[test]
    fn debug_does_not_need_debug_payload() {
        struct Opaque;

        assert_eq!(format!("{:?}", TryPutError::Full(Opaque)), "Full(..)");
        assert_eq!(format!("{:?}", PutError(Opaque)), "PutError(..)");
    }

    #[test]
    fn display_messages() {
        assert_eq!(TryPutError::Full(0).to_string(), "queue is full");
        assert_eq!(GetError.to_string(), "get on a disposed queue");
        assert_eq!(TryGetError::Empty.to_string(), "queue is empty");
        assert_eq!(
            GetTimeoutError::Timeout.to_string(),
            "timed out waiting for an item"
        );
    }
}
