//! Bounded retry of optimistic commits.

use crate::error::{CoreError, CoreResult};
use crate::version::Version;
use tracing::{debug, warn};

/// Result of a bounded sequence of commit attempts.
#[derive(Debug)]
pub enum CommitOutcome<T = Version> {
    /// An attempt succeeded.
    Committed(T),
    /// Every attempt hit a conflict.
    ConflictExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// An attempt failed with a non-retryable error.
    Fatal(CoreError),
}

impl<T> CommitOutcome<T> {
    /// Converts the outcome into a result; exhausted conflicts become `Abort`.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, or `Abort` if conflicts were exhausted.
    pub fn into_result(self) -> CoreResult<T> {
        match self {
            Self::Committed(value) => Ok(value),
            Self::ConflictExhausted { attempts } => Err(CoreError::abort(format!(
                "gave up after {attempts} conflicting attempts"
            ))),
            Self::Fatal(err) => Err(err),
        }
    }

    /// Returns true if an attempt succeeded.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Runs `attempt` up to `max_attempts` times (at least once).
///
/// Conflicts (see [`CoreError::is_conflict`]) are retried; any other error
/// ends the sequence immediately. The attempt receives its zero-based index.
pub fn with_bounded_retry<T, F>(max_attempts: u32, mut attempt: F) -> CommitOutcome<T>
where
    F: FnMut(u32) -> CoreResult<T>,
{
    let max_attempts = max_attempts.max(1);
    for index in 0..max_attempts {
        match attempt(index) {
            Ok(value) => return CommitOutcome::Committed(value),
            Err(err) if err.is_conflict() => {
                debug!(attempt = index, error = %err, "commit attempt conflicted");
            }
            Err(err) => return CommitOutcome::Fatal(err),
        }
    }
    warn!(attempts = max_attempts, "commit conflicts exhausted");
    CommitOutcome::ConflictExhausted {
        attempts: max_attempts,
    }
}
