//! Typed command frames and their validation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default per-command timeout when the client omits one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Floor for per-command timeouts.
const MIN_TIMEOUT_MS: u64 = 1_000;

/// Upper bound on `click_count`.
const MAX_CLICK_COUNT: u32 = 10;

/// Allowed range for fill typing delay.
const MAX_TYPING_DELAY_MS: u64 = 1_000;

/// Allowed range for wait polling.
const MIN_POLL_INTERVAL_MS: u64 = 50;
const MAX_POLL_INTERVAL_MS: u64 = 5_000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_click_count() -> u32 {
    1
}

fn default_poll_interval() -> u64 {
    100
}

/// Page lifecycle milestone to await after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Mouse button for click commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// What to pull out of a matched element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
    #[default]
    Text,
    Html,
    Attribute,
    Property,
}

/// Condition a wait command blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
    TextEquals,
    CustomScript,
}

impl WaitCondition {
    /// Conditions that target a specific element and therefore need a selector.
    pub fn needs_selector(self) -> bool {
        matches!(
            self,
            WaitCondition::Visible
                | WaitCondition::Hidden
                | WaitCondition::Attached
                | WaitCondition::Detached
                | WaitCondition::TextEquals
        )
    }
}

/// Fractional position inside an element's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePosition {
    pub x: f64,
    pub y: f64,
}

/// Method-specific body of a request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Action {
    /// Open an isolated browser session for the calling client.
    CreateSession,

    /// Close a session the calling client owns.
    CloseSession,

    Navigate {
        url: String,
        #[serde(default)]
        wait_until: WaitUntil,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referer: Option<String>,
    },

    Click {
        selector: String,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_click_count")]
        click_count: u32,
        #[serde(default)]
        force: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<RelativePosition>,
    },

    Fill {
        selector: String,
        text: String,
        #[serde(default = "default_true")]
        clear_first: bool,
        #[serde(default)]
        press_enter: bool,
        #[serde(default)]
        typing_delay_ms: u64,
        #[serde(default = "default_true")]
        validate_after: bool,
    },

    Extract {
        selector: String,
        #[serde(default)]
        extract_type: ExtractKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        property_name: Option<String>,
        #[serde(default)]
        multiple: bool,
        #[serde(default = "default_true")]
        trim_whitespace: bool,
    },

    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default)]
        condition: WaitCondition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_js: Option<String>,
        #[serde(default = "default_poll_interval")]
        poll_interval_ms: u64,
    },
}

impl Action {
    /// Wire name of the method, as it appears in the `method` field.
    pub fn method(&self) -> &'static str {
        match self {
            Action::CreateSession => "create_session",
            Action::CloseSession => "close_session",
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Fill { .. } => "fill",
            Action::Extract { .. } => "extract",
            Action::Wait { .. } => "wait",
        }
    }

    /// Whether executing this action can change observable page state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::Navigate { .. } | Action::Click { .. } | Action::Fill { .. }
        )
    }
}

/// A fully parsed request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Client-chosen request id, echoed in the reply.
    pub id: String,

    /// Target session; empty for session-create or to use the client's
    /// most recent session.
    #[serde(default)]
    pub session_id: String,

    /// Per-command timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(flatten)]
    pub action: Action,
}

impl CommandFrame {
    /// Validate field ranges and cross-field requirements.
    ///
    /// `max_timeout_ms` is the system-wide ceiling; a larger requested
    /// timeout is a validation failure rather than a silent clamp.
    pub fn validate(&self, max_timeout_ms: u64) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.timeout < MIN_TIMEOUT_MS || self.timeout > max_timeout_ms {
            return Err(ValidationError::OutOfRange {
                field: "timeout",
                min: MIN_TIMEOUT_MS,
                max: max_timeout_ms,
            });
        }

        match &self.action {
            Action::CreateSession | Action::CloseSession => Ok(()),
            Action::Navigate { url, .. } => {
                if url.is_empty() {
                    return Err(ValidationError::MissingField("url"));
                }
                Ok(())
            }
            Action::Click {
                selector,
                click_count,
                position,
                ..
            } => {
                if selector.is_empty() {
                    return Err(ValidationError::MissingField("selector"));
                }
                if *click_count < 1 || *click_count > MAX_CLICK_COUNT {
                    return Err(ValidationError::OutOfRange {
                        field: "click_count",
                        min: 1,
                        max: MAX_CLICK_COUNT as u64,
                    });
                }
                if let Some(pos) = position {
                    if !(0.0..=1.0).contains(&pos.x) || !(0.0..=1.0).contains(&pos.y) {
                        return Err(ValidationError::InvalidField {
                            field: "position",
                            reason: "coordinates must be between 0.0 and 1.0",
                        });
                    }
                }
                Ok(())
            }
            Action::Fill {
                selector,
                typing_delay_ms,
                ..
            } => {
                if selector.is_empty() {
                    return Err(ValidationError::MissingField("selector"));
                }
                if *typing_delay_ms > MAX_TYPING_DELAY_MS {
                    return Err(ValidationError::OutOfRange {
                        field: "typing_delay_ms",
                        min: 0,
                        max: MAX_TYPING_DELAY_MS,
                    });
                }
                Ok(())
            }
            Action::Extract {
                selector,
                extract_type,
                attribute_name,
                property_name,
                ..
            } => {
                if selector.is_empty() {
                    return Err(ValidationError::MissingField("selector"));
                }
                if *extract_type == ExtractKind::Attribute
                    && attribute_name.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ValidationError::MissingField("attribute_name"));
                }
                if *extract_type == ExtractKind::Property
                    && property_name.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ValidationError::MissingField("property_name"));
                }
                Ok(())
            }
            Action::Wait {
                selector,
                condition,
                text_content,
                custom_js,
                poll_interval_ms,
            } => {
                if condition.needs_selector() && selector.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::MissingField("selector"));
                }
                if *condition == WaitCondition::TextEquals
                    && text_content.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ValidationError::MissingField("text_content"));
                }
                if *condition == WaitCondition::CustomScript
                    && custom_js.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ValidationError::MissingField("custom_js"));
                }
                if *poll_interval_ms < MIN_POLL_INTERVAL_MS
                    || *poll_interval_ms > MAX_POLL_INTERVAL_MS
                {
                    return Err(ValidationError::OutOfRange {
                        field: "poll_interval_ms",
                        min: MIN_POLL_INTERVAL_MS,
                        max: MAX_POLL_INTERVAL_MS,
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<CommandFrame, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_navigate_roundtrip() {
        let frame = parse(
            r#"{"id":"1","method":"navigate","session_id":"s1","url":"https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(frame.id, "1");
        assert_eq!(frame.session_id, "s1");
        assert_eq!(frame.timeout, DEFAULT_TIMEOUT_MS);
        match &frame.action {
            Action::Navigate { url, wait_until, .. } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(*wait_until, WaitUntil::Load);
            }
            other => panic!("wrong action: {:?}", other),
        }
        assert!(frame.validate(300_000).is_ok());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result = parse(r#"{"id":"1","method":"teleport","session_id":"s1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_click_defaults() {
        let frame =
            parse(r##"{"id":"2","method":"click","session_id":"s1","selector":"#go"}"##).unwrap();
        match &frame.action {
            Action::Click {
                button,
                click_count,
                force,
                position,
                ..
            } => {
                assert_eq!(*button, MouseButton::Left);
                assert_eq!(*click_count, 1);
                assert!(!force);
                assert!(position.is_none());
            }
            other => panic!("wrong action: {:?}", other),
        }
    }

    #[test]
    fn test_click_position_out_of_range() {
        let frame = parse(
            r#"{"id":"2","method":"click","session_id":"s1","selector":"a","position":{"x":1.5,"y":0.5}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame.validate(300_000),
            Err(ValidationError::InvalidField { field: "position", .. })
        ));
    }

    #[test]
    fn test_extract_attribute_requires_name() {
        let frame = parse(
            r#"{"id":"3","method":"extract","session_id":"s1","selector":"a","extract_type":"attribute"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame.validate(300_000),
            Err(ValidationError::MissingField("attribute_name"))
        ));
    }

    #[test]
    fn test_wait_element_condition_requires_selector() {
        let frame =
            parse(r#"{"id":"4","method":"wait","session_id":"s1","condition":"visible"}"#).unwrap();
        assert!(matches!(
            frame.validate(300_000),
            Err(ValidationError::MissingField("selector"))
        ));
    }

    #[test]
    fn test_wait_global_condition_needs_no_selector() {
        let frame =
            parse(r#"{"id":"4","method":"wait","session_id":"s1","condition":"load"}"#).unwrap();
        assert!(frame.validate(300_000).is_ok());
    }

    #[test]
    fn test_timeout_ceiling_enforced() {
        let frame = parse(
            r#"{"id":"5","method":"navigate","session_id":"s1","url":"https://a.com","timeout":600000}"#,
        )
        .unwrap();
        assert!(matches!(
            frame.validate(300_000),
            Err(ValidationError::OutOfRange { field: "timeout", .. })
        ));
    }

    #[test]
    fn test_mutating_classification() {
        let nav = parse(
            r#"{"id":"1","method":"navigate","session_id":"s","url":"https://a.com"}"#,
        )
        .unwrap();
        let ext =
            parse(r#"{"id":"2","method":"extract","session_id":"s","selector":"p"}"#).unwrap();
        let wait = parse(r#"{"id":"3","method":"wait","session_id":"s","condition":"load"}"#)
            .unwrap();
        assert!(nav.action.is_mutating());
        assert!(!ext.action.is_mutating());
        assert!(!wait.action.is_mutating());
    }

    #[test]
    fn test_create_session_frame() {
        let frame = parse(r#"{"id":"9","method":"create_session"}"#).unwrap();
        assert!(frame.session_id.is_empty());
        assert!(matches!(frame.action, Action::CreateSession));
        assert!(frame.validate(300_000).is_ok());
    }
}
