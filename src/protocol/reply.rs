//! Reply payload interpretation.
//!
//! A `phx_reply` payload has the shape `{"status": "ok" | ..., "response": {...}}`.

use serde::Deserialize;
use serde_json::Value;

/// Decoded `phx_reply` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Reply {
    /// Reply status, `"ok"` on success.
    #[serde(default)]
    pub status: String,
    /// Event-specific response object.
    #[serde(default)]
    pub response: Value,
}

impl Reply {
    /// Interprets a reply payload; anything unexpected yields an empty reply.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        Self::deserialize(payload).unwrap_or_default()
    }

    /// Returns `true` if the status is `ok` (case-insensitive).
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }

    /// Returns a string field of the response, if present.
    #[must_use]
    pub fn response_str(&self, key: &str) -> Option<&str> {
        self.response.get(key).and_then(Value::as_str)
    }

    /// Extracts the failure reason of a rejected reply.
    ///
    /// Prefers a `message`/`error_code` pair, then `reason`, then falls back
    /// to `"unknown reason"`.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        let field = |key: &str| {
            self.response.get(key).map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
        };
        if self.response.get("error_code").is_some()
            && let Some(message) = field("message")
        {
            return message;
        }
        field("reason").unwrap_or_else(|| "unknown reason".to_string())
    }
}
