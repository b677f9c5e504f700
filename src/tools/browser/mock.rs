//! Mock 浏览器（用于测试，无需网络）
//!
//! 预置 URL -> 页面文本；记录每次操作，便于断言各 Worker 只操作自己的标签页。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::tools::browser::{ActionResult, Actuator, PageInspector, ScrollDirection, TabId};

#[derive(Debug, Default)]
struct MockTab {
    history: Vec<String>,
    cursor: usize,
    scroll: usize,
    fields: BTreeMap<String, String>,
}

impl MockTab {
    fn current(&self) -> Option<&str> {
        self.history.get(self.cursor).map(String::as_str)
    }

    fn visit(&mut self, url: &str) {
        if !self.history.is_empty() {
            self.history.truncate(self.cursor + 1);
        }
        self.history.push(url.to_string());
        self.cursor = self.history.len() - 1;
        self.scroll = 0;
        self.fields.clear();
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_tab: usize,
    tabs: HashMap<TabId, MockTab>,
    calls: Vec<String>,
    closed: Vec<TabId>,
}

/// Mock 浏览器
#[derive(Debug, Default)]
pub struct MockBrowser {
    pages: HashMap<String, String>,
    failing_urls: HashSet<String>,
    state: Mutex<MockState>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置页面内容
    pub fn with_page(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.pages.insert(url.into(), text.into());
        self
    }

    /// 打开该 URL 时返回失败
    pub fn with_failing_url(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.insert(url.into());
        self
    }

    /// 已记录的操作（形如 "navigate tab-1 https://..."）
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn tabs_created(&self) -> usize {
        self.state.lock().map(|s| s.next_tab).unwrap_or_default()
    }

    pub fn tabs_closed(&self) -> Vec<TabId> {
        self.state.lock().map(|s| s.closed.clone()).unwrap_or_default()
    }

    /// 同步读取某个标签页的快照（测试断言用）
    pub fn read_page_text(&self, tab: &TabId) -> String {
        let Ok(state) = self.state.lock() else {
            return String::new();
        };
        state
            .tabs
            .get(tab)
            .map(|t| self.render(t))
            .unwrap_or_default()
    }

    fn render(&self, tab: &MockTab) -> String {
        let Some(url) = tab.current() else {
            return "URL: about:blank".to_string();
        };
        let body = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("Page content for {}", url));
        let mut out = format!("URL: {}\nScroll: {}\n\n{}", url, tab.scroll, body);
        for (r, v) in &tab.fields {
            out.push_str(&format!("\nField [{}] = \"{}\"", r, v));
        }
        out
    }

    fn with_tab<F>(&self, tab: &TabId, call: String, f: F) -> ActionResult
    where
        F: FnOnce(&mut MockTab) -> ActionResult,
    {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(e) => return ActionResult::failed(e.to_string()),
        };
        state.calls.push(call);
        match state.tabs.get_mut(tab) {
            Some(t) => f(t),
            None => ActionResult::failed(format!("Unknown tab {}", tab)),
        }
    }
}

#[async_trait]
impl Actuator for MockBrowser {
    async fn create_tab(&self, url: Option<&str>) -> Result<TabId, String> {
        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        state.next_tab += 1;
        let id = TabId::new(format!("tab-{}", state.next_tab));
        let mut tab = MockTab::default();
        if let Some(url) = url {
            tab.visit(url);
        }
        state.calls.push(format!("create_tab {} {}", id, url.unwrap_or("")));
        state.tabs.insert(id.clone(), tab);
        Ok(id)
    }

    async fn close_tab(&self, tab: &TabId) -> ActionResult {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(e) => return ActionResult::failed(e.to_string()),
        };
        state.calls.push(format!("close_tab {}", tab));
        if state.tabs.remove(tab).is_some() {
            state.closed.push(tab.clone());
            ActionResult::ok(format!("Closed {}", tab))
        } else {
            ActionResult::failed(format!("Unknown tab {}", tab))
        }
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> ActionResult {
        let failing = self.failing_urls.contains(url);
        self.with_tab(tab, format!("navigate {} {}", tab, url), |t| {
            if failing {
                return ActionResult::failed(format!("Navigate failed: {} returned 503", url));
            }
            t.visit(url);
            ActionResult::ok(format!("Navigated to {}", url))
        })
    }

    async fn click(&self, tab: &TabId, element_ref: &str) -> ActionResult {
        self.with_tab(tab, format!("click {} {}", tab, element_ref), |t| {
            if t.current().is_none() {
                return ActionResult::failed("No page loaded");
            }
            ActionResult::ok(format!("Clicked element [{}]", element_ref))
        })
    }

    async fn fill(&self, tab: &TabId, element_ref: &str, text: &str) -> ActionResult {
        self.with_tab(tab, format!("fill {} {} {}", tab, element_ref, text), |t| {
            t.fields.insert(element_ref.to_string(), text.to_string());
            ActionResult::ok(format!("Typed \"{}\" into element [{}]", text, element_ref))
        })
    }

    async fn scroll(&self, tab: &TabId, direction: ScrollDirection) -> ActionResult {
        self.with_tab(tab, format!("scroll {} {:?}", tab, direction), |t| {
            t.scroll = match direction {
                ScrollDirection::Down => t.scroll + 1,
                ScrollDirection::Up => t.scroll.saturating_sub(1),
            };
            ActionResult::ok(format!("Scrolled {:?}", direction))
        })
    }

    async fn go_back(&self, tab: &TabId) -> ActionResult {
        self.with_tab(tab, format!("go_back {}", tab), |t| {
            if t.cursor == 0 {
                return ActionResult::failed("No previous page");
            }
            t.cursor -= 1;
            ActionResult::ok("Went back")
        })
    }

    async fn go_forward(&self, tab: &TabId) -> ActionResult {
        self.with_tab(tab, format!("go_forward {}", tab), |t| {
            if t.cursor + 1 >= t.history.len() {
                return ActionResult::failed("No next page");
            }
            t.cursor += 1;
            ActionResult::ok("Went forward")
        })
    }

    async fn refresh(&self, tab: &TabId) -> ActionResult {
        self.with_tab(tab, format!("refresh {}", tab), |t| match t.current() {
            Some(url) => ActionResult::ok(format!("Reloaded {}", url)),
            None => ActionResult::failed("No page loaded"),
        })
    }
}

#[async_trait]
impl PageInspector for MockBrowser {
    async fn read_flattened_page(&self, tab: &TabId) -> Result<String, String> {
        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        state.calls.push(format!("read_page {}", tab));
        let t = state
            .tabs
            .get(tab)
            .ok_or_else(|| format!("Unknown tab {}", tab))?;
        Ok(self.render(t))
    }
}
