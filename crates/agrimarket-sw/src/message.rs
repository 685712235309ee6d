//! Control messages posted to the worker by open pages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// A control message understood by the caching worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
    /// Add URLs to the current static cache, all or nothing.
    CacheUrls { urls: Vec<String> },
    /// Delete every cache.
    ClearCache,
}

impl ControlMessage {
    /// Interpret a posted value. Unknown types, missing fields and
    /// non-objects yield `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        match serde_json::from_value(data.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                trace!(error = %e, "Ignoring message");
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
