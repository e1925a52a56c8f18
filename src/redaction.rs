//! Redaction Filter
//!
//! Strips sensitive fields from arbitrary JSON documents before they leave
//! an emitting process or are written to the ledger.

use serde_json::Value;
use std::collections::HashSet;

/// Replacement written over every sensitive value.
pub const REDACTED_MARKER: &str = "***REDACTED***";

/// Field names redacted when no explicit set is configured.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &["password", "creditCardNumber", "ssn", "token"];

/// Recursively replaces the values of sensitive fields with [`REDACTED_MARKER`].
#[derive(Debug, Clone)]
pub struct RedactionFilter {
    sensitive_keys: HashSet<String>,
}

impl Default for RedactionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS.iter().copied())
    }
}

impl RedactionFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.contains(key)
    }

    /// Return a redacted copy of `doc`. Scalars and unknown shapes pass through.
    pub fn redact(&self, doc: &Value) -> Value {
        let mut redacted = doc.clone();
        self.redact_in_place(&mut redacted);
        redacted
    }

    pub fn redact_in_place(&self, doc: &mut Value) {
        match doc {
            Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *value = Value::String(REDACTED_MARKER.to_string());
                    } else {
                        self.redact_in_place(value);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.redact_in_place(item);
                }
            }
            _ => {}
        }
    }
}
