//! Result aggregation for best-effort cleanup.
//!
//! Leaving channels, unsubscribing and disconnecting must never fail the
//! caller during teardown. Instead of discarding the errors, those paths
//! record them in a [`TeardownReport`] and log each one.

use crate::error::ChannelError;

/// One swallowed failure of a teardown step.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Human-readable name of the step, e.g. `"leave room:lobby"`.
    pub step: String,
    /// Error the step ended with.
    pub error: ChannelError,
}

/// Failures collected while tearing something down.
#[derive(Debug, Default)]
#[must_use]
pub struct TeardownReport {
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed step and logs it.
    pub fn record(&mut self, step: impl Into<String>, error: ChannelError) {
        let step = step.into();
        tracing::warn!(%step, %error, code = error.error_code(), "teardown step failed");
        self.failures.push(TeardownFailure { step, error });
    }

    /// Appends all failures of `other`.
    pub fn merge(&mut self, other: Self) {
        self.failures.extend(other.failures);
    }

    /// Returns `true` if every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the recorded failures in the order they happened.
    #[must_use]
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// Converts the report into the first recorded error, if any.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed step.
    pub fn into_result(self) -> Result<(), ChannelError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }
}
