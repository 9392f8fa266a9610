//! Deterministic cache keys for read-only commands.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use webgate_protocol::Action;

/// How a command interacts with the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    /// Read-only; the result may be stored and replayed.
    Cacheable,
    /// Changes page state; all entries for the session must be dropped.
    Invalidates,
    /// Neither cached nor invalidating (time-sensitive reads, session ops).
    NotCacheable,
}

/// Classify an action for the cache.
///
/// Waits are read-only but their results encode elapsed time, so they are
/// never cached.
pub fn classify(action: &Action) -> Cacheability {
    match action {
        Action::Extract { .. } => Cacheability::Cacheable,
        Action::Navigate { .. } | Action::Click { .. } | Action::Fill { .. } => {
            Cacheability::Invalidates
        }
        Action::Wait { .. } | Action::CreateSession | Action::CloseSession => {
            Cacheability::NotCacheable
        }
    }
}

/// Compute the fingerprint for a cacheable action, or `None` when the
/// action is not cacheable. The key is scoped by session id so invalidation
/// can drop one session's entries without touching the rest.
pub fn fingerprint(session_id: &str, action: &Action) -> Option<String> {
    if classify(action) != Cacheability::Cacheable {
        return None;
    }

    // Only fields that affect the output participate in the key; a sorted
    // map keeps the serialization deterministic.
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    if let Action::Extract {
        selector,
        extract_type,
        attribute_name,
        property_name,
        multiple,
        trim_whitespace,
    } = action
    {
        fields.insert("method", Value::from("extract"));
        fields.insert("selector", Value::from(selector.as_str()));
        fields.insert(
            "extract_type",
            serde_json::to_value(extract_type).unwrap_or(Value::Null),
        );
        if let Some(name) = attribute_name {
            fields.insert("attribute_name", Value::from(name.as_str()));
        }
        if let Some(name) = property_name {
            fields.insert("property_name", Value::from(name.as_str()));
        }
        fields.insert("multiple", Value::from(*multiple));
        fields.insert("trim_whitespace", Value::from(*trim_whitespace));
    }

    let normalized = serde_json::to_string(&fields).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Some(format!("{}:{}", session_id, &digest[..16]))
}

/// Prefix matching all of a session's fingerprints.
pub fn session_prefix(session_id: &str) -> String {
    format!("{}:", session_id)
}
