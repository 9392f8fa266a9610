//! Deterministic in-memory browser backend for tests.
//!
//! Implements the driver seam without any real browser, so executors,
//! pool, session, and server logic can be exercised hermetically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use webgate_protocol::MouseButton;

use crate::driver::{
    BoundingBox, BrowserBackend, ContextHandle, ElementSnapshot, PageDriver, PageLifecycle,
    ReadKind,
};
use crate::error::BrowserError;

/// One fake element with everything the driver can observe about it.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub tag: String,
    pub class_name: String,
    pub text: String,
    pub html: String,
    pub visible: bool,
    pub input_like: bool,
    pub input_type: String,
    pub value: Option<String>,
    pub bounds: Option<BoundingBox>,
    pub attrs: HashMap<String, String>,
    pub props: HashMap<String, Value>,
}

impl MockElement {
    /// A visible element with text content.
    pub fn text(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            class_name: String::new(),
            text: text.to_string(),
            html: text.to_string(),
            visible: true,
            input_like: false,
            input_type: tag.to_string(),
            value: None,
            bounds: Some(BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 100.0,
                height: 20.0,
            }),
            attrs: HashMap::new(),
            props: HashMap::new(),
        }
    }

    /// A visible input element.
    pub fn input(input_type: &str, value: &str) -> Self {
        let mut el = Self::text("input", "");
        el.input_like = true;
        el.input_type = input_type.to_string();
        el.value = Some(value.to_string());
        el
    }

    pub fn invisible(mut self) -> Self {
        self.visible = false;
        self.bounds = None;
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class_name = class.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_prop(mut self, name: &str, value: Value) -> Self {
        self.props.insert(name.to_string(), value);
        self
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    fn snapshot(&self, index: usize) -> ElementSnapshot {
        ElementSnapshot {
            index,
            tag: self.tag.clone(),
            class_name: self.class_name.clone(),
            text: self.text.clone(),
            visible: self.visible,
            input_like: self.input_like,
            input_type: self.input_type.clone(),
            value: self.value.clone(),
            bounds: self.bounds,
        }
    }
}

/// DOM served for one URL.
#[derive(Debug, Clone, Default)]
pub struct MockDom {
    pub title: String,
    /// Simulated redirect target.
    pub final_url: Option<String>,
    pub elements: HashMap<String, Vec<MockElement>>,
}

impl MockDom {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn with_element(mut self, selector: &str, element: MockElement) -> Self {
        self.elements.entry(selector.to_string()).or_default().push(element);
        self
    }

    pub fn redirecting_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }
}

/// Everything a new page starts with.
#[derive(Debug, Clone, Default)]
pub struct PageSeed {
    pub routes: HashMap<String, MockDom>,
    pub elements: HashMap<String, Vec<MockElement>>,
}

#[derive(Debug)]
struct PageState {
    url: String,
    title: String,
    lifecycle: PageLifecycle,
    elements: HashMap<String, Vec<MockElement>>,
    routes: HashMap<String, MockDom>,
    focused: Option<(String, usize)>,
    node_count: u64,
    clicks: Vec<(f64, f64, MouseButton, u32)>,
    keys: Vec<String>,
    typed: Vec<String>,
    navigations: Vec<String>,
    script_results: Vec<bool>,
    viewport: Option<(u32, u32)>,
    /// When set, navigations never reach `Complete` (timeout testing).
    stuck_loading: bool,
    /// When set, `navigate` never returns (hard-deadline testing).
    hang_on_navigate: bool,
    reset_count: u32,
    closed: bool,
}

/// A deterministic page; cloning shares the underlying state.
#[derive(Clone)]
pub struct MockPage {
    state: Arc<Mutex<PageState>>,
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new(PageSeed::default())
    }
}

impl MockPage {
    pub fn new(seed: PageSeed) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: "about:blank".to_string(),
                title: String::new(),
                lifecycle: PageLifecycle::Complete,
                elements: seed.elements,
                routes: seed.routes,
                focused: None,
                node_count: 10,
                clicks: Vec::new(),
                keys: Vec::new(),
                typed: Vec::new(),
                navigations: Vec::new(),
                script_results: Vec::new(),
                viewport: None,
                stuck_loading: false,
                hang_on_navigate: false,
                reset_count: 0,
                closed: false,
            })),
        }
    }

    // Test-side setup ----------------------------------------------------

    pub fn install_element(&self, selector: &str, element: MockElement) {
        self.state
            .lock()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
    }

    pub fn remove_elements(&self, selector: &str) {
        self.state.lock().elements.remove(selector);
    }

    pub fn set_stuck_loading(&self, stuck: bool) {
        let mut state = self.state.lock();
        state.stuck_loading = stuck;
        if stuck {
            state.lifecycle = PageLifecycle::Loading;
        }
    }

    pub fn push_script_result(&self, result: bool) {
        self.state.lock().script_results.push(result);
    }

    pub fn set_hang_on_navigate(&self, hang: bool) {
        self.state.lock().hang_on_navigate = hang;
    }

    // Test-side observation ----------------------------------------------

    pub fn clicks(&self) -> Vec<(f64, f64, MouseButton, u32)> {
        self.state.lock().clicks.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().keys.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.state.lock().typed.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.state.lock().viewport
    }

    pub fn reset_count(&self) -> u32 {
        self.state.lock().reset_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn element_value(&self, selector: &str, index: usize) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(selector)
            .and_then(|els| els.get(index))
            .and_then(|el| el.value.clone())
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn navigate(&self, url: &str, _referer: Option<&str>) -> Result<(), BrowserError> {
        let hang = self.state.lock().hang_on_navigate;
        if hang {
            // Parked until the caller's deadline cancels this future.
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock();
        state.navigations.push(url.to_string());

        if let Some(dom) = state.routes.get(url).cloned() {
            state.url = dom.final_url.unwrap_or_else(|| url.to_string());
            state.title = dom.title;
            state.elements = dom.elements;
        } else {
            state.url = url.to_string();
            state.title = format!("Page at {}", url);
        }
        state.node_count += 1;
        state.lifecycle = if state.stuck_loading {
            PageLifecycle::Loading
        } else {
            PageLifecycle::Complete
        };
        Ok(())
    }

    async fn lifecycle(&self) -> Result<PageLifecycle, BrowserError> {
        Ok(self.state.lock().lifecycle)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().url.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().title.clone())
    }

    async fn dom_node_count(&self) -> Result<u64, BrowserError> {
        Ok(self.state.lock().node_count)
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .get(selector)
            .map(|els| {
                els.iter()
                    .enumerate()
                    .map(|(i, el)| el.snapshot(i))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_element(
        &self,
        selector: &str,
        index: usize,
        kind: ReadKind<'_>,
    ) -> Result<Option<Value>, BrowserError> {
        let state = self.state.lock();
        let Some(el) = state.elements.get(selector).and_then(|els| els.get(index)) else {
            return Ok(None);
        };
        let value = match kind {
            ReadKind::Text => Value::String(el.text.clone()),
            ReadKind::Html => Value::String(el.html.clone()),
            ReadKind::Attribute(name) => el
                .attrs
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
            ReadKind::Property(name) => {
                if name == "value" {
                    el.value
                        .as_ref()
                        .map(|v| Value::String(v.clone()))
                        .unwrap_or(Value::Null)
                } else {
                    el.props.get(name).cloned().unwrap_or(Value::Null)
                }
            }
        };
        Ok(Some(value))
    }

    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        state.clicks.push((x, y, button, click_count));
        state.node_count += 1;
        Ok(())
    }

    async fn focus(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        self.state.lock().focused = Some((selector.to_string(), index));
        Ok(())
    }

    async fn clear_value(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        if let Some(el) = state
            .elements
            .get_mut(selector)
            .and_then(|els| els.get_mut(index))
        {
            el.value = Some(String::new());
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        state.typed.push(text.to_string());
        if let Some((selector, index)) = state.focused.clone() {
            if let Some(el) = state
                .elements
                .get_mut(&selector)
                .and_then(|els| els.get_mut(index))
            {
                let mut value = el.value.clone().unwrap_or_default();
                value.push_str(text);
                el.value = Some(value);
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        self.state.lock().keys.push(key.to_string());
        Ok(())
    }

    async fn evaluate_bool(&self, _script: &str) -> Result<bool, BrowserError> {
        let mut state = self.state.lock();
        if state.script_results.is_empty() {
            Ok(false)
        } else {
            Ok(state.script_results.remove(0))
        }
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.state.lock().viewport = Some((width, height));
        Ok(())
    }

    async fn reset(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        state.url = "about:blank".to_string();
        state.title.clear();
        state.elements.clear();
        state.lifecycle = PageLifecycle::Complete;
        state.reset_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// One fake isolated context.
pub struct MockContext {
    id: String,
    healthy: Arc<AtomicBool>,
    seed: PageSeed,
    pages: Arc<Mutex<Vec<MockPage>>>,
}

#[async_trait]
impl ContextHandle for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open_page(&self) -> Result<Box<dyn PageDriver>, BrowserError> {
        let page = MockPage::new(self.seed.clone());
        self.pages.lock().push(page.clone());
        Ok(Box::new(page))
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.healthy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Browser backend producing deterministic contexts and pages.
pub struct MockBackend {
    counter: AtomicUsize,
    health_flags: DashMap<String, Arc<AtomicBool>>,
    seed: Mutex<PageSeed>,
    pages: Arc<Mutex<Vec<MockPage>>>,
    fail_creates: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            health_flags: DashMap::new(),
            seed: Mutex::new(PageSeed::default()),
            pages: Arc::new(Mutex::new(Vec::new())),
            fail_creates: AtomicBool::new(false),
        }
    }

    /// Serve this DOM whenever a page navigates to `url`.
    pub fn route(&self, url: &str, dom: MockDom) {
        self.seed.lock().routes.insert(url.to_string(), dom);
    }

    /// Pre-install an element on every page opened from now on.
    pub fn seed_element(&self, selector: &str, element: MockElement) {
        self.seed
            .lock()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
    }

    pub fn contexts_created(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    /// Mark a context unhealthy, as a crashed browser would.
    pub fn poison_context(&self, id: &str) {
        if let Some(flag) = self.health_flags.get(id) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Pages opened so far, in creation order.
    pub fn pages(&self) -> Vec<MockPage> {
        self.pages.lock().clone()
    }

    pub fn last_page(&self) -> Option<MockPage> {
        self.pages.lock().last().cloned()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserBackend for MockBackend {
    async fn create_context(&self) -> Result<Box<dyn ContextHandle>, BrowserError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(BrowserError::ConnectionFailed(
                "mock backend configured to fail".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mock-context-{}", n);
        let healthy = Arc::new(AtomicBool::new(true));
        self.health_flags.insert(id.clone(), healthy.clone());
        Ok(Box::new(MockContext {
            id,
            healthy,
            seed: self.seed.lock().clone(),
            pages: Arc::clone(&self.pages),
        }))
    }
}
