//! Defines error types.
use std::fmt;
use thiserror::Error;

/// Crate result type (re-exported),
pub type Result<T> = std::result::Result<T, Error>;

/// Error types.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// Queue constructed with a capacity of zero.
    #[error("capacity must be at least 1, requested: {0}")]
    InvalidCapacity(usize),
}

/// Returned by the non-blocking producer operations when every slot is occupied.
/// Hands the rejected value back to the caller.
#[derive(Error)]
#[error("queue is full")]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Recover the value that could not be enqueued.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

#[cold]
#[inline(never)]
pub(crate) const fn invalid_capacity(requested: usize) -> Error {
    Error::InvalidCapacity(requested)
}
