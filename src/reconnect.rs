//! Exponential backoff for reconnection attempts

use crate::error::{Error, Result};
use std::time::Duration;

/// Bounded retry policy used by [`Session::reconnect`](crate::Session::reconnect).
///
/// The delay after attempt `n` (0-indexed) is
/// `min(initial_backoff * 2^n, max_backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_attempts` is zero or
    /// `initial_backoff` exceeds `max_backoff`.
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("reconnect attempts must be positive".into()));
        }
        if initial_backoff > max_backoff {
            return Err(Error::Config(format!(
                "initial backoff {initial_backoff:?} exceeds max backoff {max_backoff:?}"
            )));
        }
        Ok(Self {
            initial_backoff,
            max_backoff,
            max_attempts,
        })
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay to wait after the given (0-indexed) failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}
