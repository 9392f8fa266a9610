//! The seam between the gateway and the underlying browser-control layer.
//!
//! Executors and the session manager only ever see these traits; the
//! production implementation speaks CDP to a real Chrome, the test
//! implementation lives in [`crate::testing`].

use async_trait::async_trait;
use serde_json::Value;

use webgate_protocol::MouseButton;

use crate::error::BrowserError;

/// Page load progress, as observed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLifecycle {
    Loading,
    /// DOM parsed; subresources may still be loading.
    Interactive,
    Complete,
}

/// Axis-aligned element bounds in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Page coordinate at a fractional position inside the box.
    pub fn point_at(&self, fx: f64, fy: f64) -> (f64, f64) {
        (self.x + self.width * fx, self.y + self.height * fy)
    }

    pub fn center(&self) -> (f64, f64) {
        self.point_at(0.5, 0.5)
    }
}

/// Observable facts about one element matched by a selector.
#[derive(Debug, Clone)]
pub struct ElementSnapshot {
    /// Position within the selector's match list, in DOM order.
    pub index: usize,
    pub tag: String,
    pub class_name: String,
    pub text: String,
    pub visible: bool,
    /// Whether the element accepts text input (input, textarea, etc.).
    pub input_like: bool,
    /// Input kind: the `type` attribute for inputs, else the tag name.
    pub input_type: String,
    /// Current value for input-like elements.
    pub value: Option<String>,
    pub bounds: Option<BoundingBox>,
}

/// What to read out of a matched element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind<'a> {
    Text,
    Html,
    Attribute(&'a str),
    Property(&'a str),
}

/// One open page inside an isolated context.
///
/// Methods mirror the capability set the gateway assumes of any browser
/// control layer: navigate, query, click, type, evaluate, observe.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Start a navigation. Completion is observed via [`lifecycle`].
    async fn navigate(&self, url: &str, referer: Option<&str>) -> Result<(), BrowserError>;

    async fn lifecycle(&self) -> Result<PageLifecycle, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    /// Cheap structural signal for state diffing.
    async fn dom_node_count(&self) -> Result<u64, BrowserError>;

    /// Snapshot every element matching the selector, in DOM order.
    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError>;

    /// Read data out of the n-th match; `None` when the match disappeared.
    async fn read_element(
        &self,
        selector: &str,
        index: usize,
        kind: ReadKind<'_>,
    ) -> Result<Option<Value>, BrowserError>;

    /// Dispatch a trusted click at page coordinates.
    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BrowserError>;

    /// Focus the n-th match of the selector.
    async fn focus(&self, selector: &str, index: usize) -> Result<(), BrowserError>;

    /// Clear the value of the focused element.
    async fn clear_value(&self, selector: &str, index: usize) -> Result<(), BrowserError>;

    /// Type text into the focused element.
    async fn type_text(&self, text: &str) -> Result<(), BrowserError>;

    async fn press_key(&self, key: &str) -> Result<(), BrowserError>;

    /// Evaluate a script and coerce the result to a boolean.
    async fn evaluate_bool(&self, script: &str) -> Result<bool, BrowserError>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError>;

    /// Return the page to a blank state after a cancelled command.
    async fn reset(&self) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// One isolated browser context (own cookies, storage, cache).
#[async_trait]
pub trait ContextHandle: Send + Sync {
    fn id(&self) -> &str;

    async fn open_page(&self) -> Result<Box<dyn PageDriver>, BrowserError>;

    /// Cheap liveness probe used by the pool on release.
    async fn is_healthy(&self) -> bool;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Factory for isolated contexts; one per running browser.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn create_context(&self) -> Result<Box<dyn ContextHandle>, BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_points() {
        let bb = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(bb.center(), (60.0, 45.0));
        assert_eq!(bb.point_at(0.0, 0.0), (10.0, 20.0));
        assert_eq!(bb.point_at(1.0, 1.0), (110.0, 70.0));
    }
}
