//! Reply frames and per-command success payloads.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorBody, ErrorCode};

/// Seconds since the Unix epoch, as carried in reply timestamps.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Observable page changes caused by a mutating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateDiff {
    pub url_changed: bool,
    pub title_changed: bool,
    pub dom_changed: bool,
}

impl StateDiff {
    pub fn any_changed(&self) -> bool {
        self.url_changed || self.title_changed || self.dom_changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPayload {
    pub session_id: String,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatePayload {
    /// Final URL after any redirects.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub redirected: bool,
    pub load_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<StateDiff>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickPayload {
    pub element_found: bool,
    pub element_visible: bool,
    /// Page coordinates the click landed on.
    pub click_position: ClickPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<StateDiff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickPosition {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillPayload {
    pub element_found: bool,
    /// Input kind (`text`, `textarea`, `email`, ...).
    pub element_type: String,
    pub text_entered: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<String>,
    pub current_value: String,
    pub validation_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<StateDiff>,
}

/// Metadata about one matched element in an extract result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub tag: String,
    #[serde(default)]
    pub class: String,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPayload {
    pub elements_found: usize,
    /// A string for single extraction, an ordered array for `multiple`.
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element_info: Vec<ExtractedItem>,
    /// Set when the payload was served from the result cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitPayload {
    pub condition_met: bool,
    pub wait_time_ms: u64,
    pub final_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<usize>,
}

/// Method-specific success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Session(SessionPayload),
    Closed(ClosedPayload),
    Navigate(NavigatePayload),
    Click(ClickPayload),
    Fill(FillPayload),
    Extract(ExtractPayload),
    Wait(WaitPayload),
}

/// One reply frame, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub id: String,
    pub success: bool,
    pub timestamp: f64,
    pub execution_time_ms: u64,
    // Flattened options emit nothing when absent.
    #[serde(flatten)]
    pub payload: Option<ReplyPayload>,
    #[serde(flatten)]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn success(id: impl Into<String>, payload: ReplyPayload, execution_time_ms: u64) -> Self {
        Self {
            id: id.into(),
            success: true,
            timestamp: epoch_seconds(),
            execution_time_ms,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: ErrorBody, execution_time_ms: u64) -> Self {
        Self {
            id: id.into(),
            success: false,
            timestamp: epoch_seconds(),
            execution_time_ms,
            payload: None,
            error: Some(error),
        }
    }

    /// Shorthand for a failure reply with just a code and message.
    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::failure(id, ErrorBody::new(code, message), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reply_shape() {
        let reply = Reply::success(
            "req-1",
            ReplyPayload::Navigate(NavigatePayload {
                url: "https://example.com/".to_string(),
                title: Some("Example Domain".to_string()),
                redirected: false,
                load_time_ms: 42,
                state_diff: Some(StateDiff {
                    url_changed: true,
                    title_changed: true,
                    dom_changed: true,
                }),
            }),
            42,
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["success"], true);
        assert_eq!(json["url"], "https://example.com/");
        assert_eq!(json["state_diff"]["url_changed"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_reply_shape() {
        let reply = Reply::error("req-2", ErrorCode::SessionNotOwned, "session not owned");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "SESSION_NOT_OWNED");
        assert_eq!(json["error_type"], "session");
        assert!(json.get("url").is_none());
    }

    #[test]
    fn test_extract_from_cache_marker() {
        let payload = ExtractPayload {
            elements_found: 1,
            data: Value::String("Example Domain".to_string()),
            element_info: vec![ExtractedItem {
                tag: "h1".to_string(),
                class: String::new(),
                index: 0,
            }],
            from_cache: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        // Marker only appears once a cached copy is replayed.
        assert!(json.get("from_cache").is_none());

        let cached = ExtractPayload {
            from_cache: true,
            ..payload
        };
        let json = serde_json::to_value(&cached).unwrap();
        assert_eq!(json["from_cache"], true);
    }

    #[test]
    fn test_state_diff_any_changed() {
        assert!(!StateDiff::default().any_changed());
        assert!(StateDiff {
            dom_changed: true,
            ..Default::default()
        }
        .any_changed());
    }

    #[test]
    fn test_epoch_seconds_monotonic_enough() {
        let t = epoch_seconds();
        assert!(t > 1_600_000_000.0);
    }
}
