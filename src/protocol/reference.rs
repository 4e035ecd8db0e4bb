//! Message references and the per-connection reference counter.
//!
//! [`Reference`] is an opaque identifier correlating a request frame with
//! its reply. References go over the wire as decimal strings; inbound
//! frames may carry them as strings or JSON numbers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque frame reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "WireReference")]
pub struct Reference(String);

/// Accepted inbound encodings of a reference.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireReference {
    Text(String),
    Number(u64),
}

impl From<WireReference> for Reference {
    fn from(wire: WireReference) -> Self {
        match wire {
            WireReference::Text(text) => Self(text),
            WireReference::Number(number) => Self::from(number),
        }
    }
}

impl Reference {
    /// Returns the reference as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Reference {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic reference generator.
///
/// References only need to be unique across outstanding requests, so the
/// counter wraps to `0` after `u64::MAX`.
#[derive(Debug, Default)]
pub struct RefCounter {
    last: AtomicU64,
}

impl RefCounter {
    /// Creates a counter whose first reference is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter whose next reference follows `last`.
    #[must_use]
    pub const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Returns a fresh reference.
    pub fn next(&self) -> Reference {
        let step = |value: u64| value.checked_add(1).unwrap_or(0);
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| Some(step(value)))
            .unwrap_or_else(|value| value);
        Reference::from(step(previous))
    }
}
