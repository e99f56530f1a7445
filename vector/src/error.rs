/// A vector was accessed outside of the range it currently exposes.
///
/// These are programming errors rather than runtime conditions: the plain
/// [`Vector`](crate::Vector) operations panic with this error's message, and
/// the `try_*` variants hand it back to the caller.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    #[error("index {index} is out of bounds for a vector of size {size}")]
    Index { index: usize, size: usize },

    #[error("invalid slice range: end {end} is before start {start}")]
    Range { start: usize, end: usize },

    #[error("cannot address {size} elements starting at offset {offset}")]
    CapacityOverflow { offset: usize, size: usize },
}

pub type Result<T, E = BoundsError> = std::result::Result<T, E>;

/// Unwraps `result`, panicking with the error's message at the caller's
/// location.
#[track_caller]
pub(crate) fn fatal<T>(result: Result<T>) -> T {
    match result {
        Ok(x) => x,
        Err(e) => panic!("{e}"),
    }
}
