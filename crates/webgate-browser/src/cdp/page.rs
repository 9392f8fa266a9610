//! A CDP-backed page implementing the driver seam.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use webgate_protocol::MouseButton;

use crate::driver::{BoundingBox, ElementSnapshot, PageDriver, PageLifecycle, ReadKind};
use crate::error::BrowserError;

use super::client::CdpClient;

/// One attached page target, scoped to a flat CDP session.
pub struct CdpPage {
    client: Arc<CdpClient>,
    target_id: String,
    session_id: String,
}

/// Shape of a `Runtime.evaluate` reply.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvalReturn {
    result: Option<EvalValue>,
    exception_details: Option<EvalException>,
}

#[derive(Deserialize)]
struct EvalValue {
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct EvalException {
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawBounds {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Deserialize)]
struct RawSnapshot {
    index: usize,
    tag: String,
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    text: String,
    visible: bool,
    input_like: bool,
    input_type: String,
    value: Option<String>,
    bounds: Option<RawBounds>,
}

impl CdpPage {
    pub(crate) fn new(client: Arc<CdpClient>, target_id: String, session_id: String) -> Self {
        Self {
            client,
            target_id,
            session_id,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub(crate) async fn enable_domains(&self) -> Result<(), BrowserError> {
        self.call("Page.enable", None).await?;
        self.call("Runtime.enable", None).await?;
        debug!("Enabled CDP domains for page {}", self.target_id);
        Ok(())
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, BrowserError> {
        self.client.call(method, params, Some(&self.session_id)).await
    }

    /// Evaluate an expression and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let raw = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        let outcome: EvalReturn = serde_json::from_value(raw)?;
        if let Some(exception) = outcome.exception_details {
            return Err(BrowserError::JavaScript(
                exception
                    .text
                    .unwrap_or_else(|| "unknown evaluation error".to_string()),
            ));
        }
        Ok(outcome.result.map(|r| r.value).unwrap_or(Value::Null))
    }

    /// Evaluate an expression that returns `JSON.stringify`-ed data.
    async fn evaluate_json(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self.evaluate(expression).await?;
        match result {
            Value::String(text) => serde_json::from_str(&text).map_err(BrowserError::from),
            Value::Null => Ok(Value::Null),
            other => Ok(other),
        }
    }

    fn button_name(button: MouseButton) -> &'static str {
        match button {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// Embed a string into generated JS as a quoted literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str, referer: Option<&str>) -> Result<(), BrowserError> {
        let mut params = json!({"url": url});
        if let Some(referer) = referer {
            params["referrer"] = json!(referer);
        }
        let result = self.call("Page.navigate", Some(params)).await?;
        if let Some(error) = result.get("errorText").and_then(|e| e.as_str()) {
            if !error.is_empty() {
                return Err(BrowserError::NavigationFailed(error.to_string()));
            }
        }
        Ok(())
    }

    async fn lifecycle(&self) -> Result<PageLifecycle, BrowserError> {
        let state = self.evaluate("document.readyState").await?;
        Ok(match state.as_str() {
            Some("complete") => PageLifecycle::Complete,
            Some("interactive") => PageLifecycle::Interactive,
            _ => PageLifecycle::Loading,
        })
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let result = self.evaluate("window.location.href").await?;
        Ok(result.as_str().unwrap_or("").to_string())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        let result = self.evaluate("document.title").await?;
        Ok(result.as_str().unwrap_or("").to_string())
    }

    async fn dom_node_count(&self) -> Result<u64, BrowserError> {
        let result = self
            .evaluate("document.getElementsByTagName('*').length")
            .await?;
        Ok(result.as_u64().unwrap_or(0))
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let script = format!(
            r#"JSON.stringify(Array.from(document.querySelectorAll({sel})).map((el, index) => {{
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                const tag = el.tagName.toLowerCase();
                const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)
                    && style.visibility !== 'hidden' && style.display !== 'none';
                const inputLike = tag === 'input' || tag === 'textarea' || tag === 'select'
                    || el.isContentEditable;
                return {{
                    index: index,
                    tag: tag,
                    class_name: typeof el.className === 'string' ? el.className : '',
                    text: el.textContent || '',
                    visible: visible,
                    input_like: inputLike,
                    input_type: tag === 'input' ? (el.getAttribute('type') || 'text') : tag,
                    value: inputLike && el.value !== undefined ? String(el.value) : null,
                    bounds: (rect.width || rect.height)
                        ? {{x: rect.x, y: rect.y, width: rect.width, height: rect.height}}
                        : null,
                }};
            }}))"#,
            sel = js_string(selector)
        );

        let raw = self.evaluate_json(&script).await?;
        let snapshots: Vec<RawSnapshot> = serde_json::from_value(raw)?;
        Ok(snapshots
            .into_iter()
            .map(|s| ElementSnapshot {
                index: s.index,
                tag: s.tag,
                class_name: s.class_name,
                text: s.text,
                visible: s.visible,
                input_like: s.input_like,
                input_type: s.input_type,
                value: s.value,
                bounds: s.bounds.map(|b| BoundingBox {
                    x: b.x,
                    y: b.y,
                    width: b.width,
                    height: b.height,
                }),
            })
            .collect())
    }

    async fn read_element(
        &self,
        selector: &str,
        index: usize,
        kind: ReadKind<'_>,
    ) -> Result<Option<Value>, BrowserError> {
        let read_expr = match kind {
            ReadKind::Text => "el.textContent".to_string(),
            ReadKind::Html => "el.innerHTML".to_string(),
            ReadKind::Attribute(name) => format!("el.getAttribute({})", js_string(name)),
            ReadKind::Property(name) => format!("el[{}]", js_string(name)),
        };
        let script = format!(
            r#"JSON.stringify((() => {{
                const el = document.querySelectorAll({sel})[{index}];
                if (!el) return {{missing: true}};
                const v = {read_expr};
                return {{value: v === undefined ? null : v}};
            }})())"#,
            sel = js_string(selector),
        );

        let raw = self.evaluate_json(&script).await?;
        if raw.get("missing").and_then(|m| m.as_bool()).unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(raw.get("value").cloned().unwrap_or(Value::Null)))
    }

    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BrowserError> {
        let button = Self::button_name(button);
        for event in ["mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                Some(json!({
                    "type": event,
                    "x": x,
                    "y": y,
                    "button": button,
                    "clickCount": click_count,
                })),
            )
            .await?;
        }
        debug!("Clicked at ({}, {}) with {} button", x, y, button);
        Ok(())
    }

    async fn focus(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({sel})[{index}];
                if (el) el.focus();
                return !!el;
            }})()"#,
            sel = js_string(selector),
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    async fn clear_value(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({sel})[{index}];
                if (el && 'value' in el) {{
                    el.value = '';
                    el.dispatchEvent(new Event('input', {{bubbles: true}}));
                }}
                return !!el;
            }})()"#,
            sel = js_string(selector),
        );
        self.evaluate(&script).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), BrowserError> {
        self.call("Input.insertText", Some(json!({"text": text})))
            .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        // Enter needs the carriage-return text for form submission.
        let text = if key == "Enter" { Some("\r") } else { None };
        for event in ["keyDown", "keyUp"] {
            let mut params = json!({
                "type": event,
                "key": key,
            });
            if event == "keyDown" {
                if let Some(text) = text {
                    params["text"] = json!(text);
                }
            }
            self.call("Input.dispatchKeyEvent", Some(params)).await?;
        }
        Ok(())
    }

    async fn evaluate_bool(&self, script: &str) -> Result<bool, BrowserError> {
        let wrapped = format!("!!({})", script);
        let result = self.evaluate(&wrapped).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.call(
            "Emulation.setDeviceMetricsOverride",
            Some(json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            })),
        )
        .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), BrowserError> {
        self.navigate("about:blank", None).await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.client.close_target(&self.target_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escaping() {
        assert_eq!(js_string("h1"), "\"h1\"");
        assert_eq!(js_string("a[href=\"x\"]"), "\"a[href=\\\"x\\\"]\"");
    }

    #[test]
    fn test_button_names() {
        assert_eq!(CdpPage::button_name(MouseButton::Left), "left");
        assert_eq!(CdpPage::button_name(MouseButton::Middle), "middle");
    }

    #[test]
    fn test_eval_return_parsing() {
        let ok: EvalReturn =
            serde_json::from_str(r#"{"result":{"type":"string","value":"hi"}}"#).unwrap();
        assert!(ok.exception_details.is_none());
        assert_eq!(ok.result.unwrap().value, Value::String("hi".to_string()));

        let thrown: EvalReturn = serde_json::from_str(
            r#"{"result":{"type":"object"},"exceptionDetails":{"text":"Uncaught"}}"#,
        )
        .unwrap();
        assert_eq!(thrown.exception_details.unwrap().text.as_deref(), Some("Uncaught"));

        // Undefined results carry no value field at all.
        let undefined: EvalReturn =
            serde_json::from_str(r#"{"result":{"type":"undefined"}}"#).unwrap();
        assert_eq!(undefined.result.unwrap().value, Value::Null);
    }

    #[test]
    fn test_raw_snapshot_parsing() {
        let raw = r#"[{"index":0,"tag":"input","class_name":"field","text":"",
            "visible":true,"input_like":true,"input_type":"email",
            "value":"a@b.c","bounds":{"x":1.0,"y":2.0,"width":30.0,"height":10.0}}]"#;
        let snapshots: Vec<RawSnapshot> = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].input_type, "email");
        assert!(snapshots[0].bounds.is_some());
    }
}
