//! Chrome 浏览器：使用 Headless Chrome 驱动真实标签页
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。headless_chrome 为同步 API，所有调用放入 spawn_blocking。
//!
//! 快照格式：页面可读文本 + 可交互元素列表（[1] button: "Submit"），click / fill 按编号定位元素。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use headless_chrome::{Browser, Tab};
use serde::Deserialize;

use crate::tools::browser::{
    truncate_chars, ActionResult, Actuator, PageInspector, ScrollDirection, TabId,
};

/// 与快照编号一致的可交互元素选择器
const INTERACTIVE_SELECTOR: &str =
    "a[href], button, input, select, textarea, [role=button], [role=link], [role=textbox], [role=searchbox], [contenteditable=true]";

#[derive(Debug, Deserialize)]
struct InteractiveElement {
    tag: String,
    label: String,
}

/// Headless Chrome 实现
pub struct ChromeBrowser {
    browser: Arc<Mutex<Option<Browser>>>,
    tabs: Arc<Mutex<HashMap<TabId, Arc<Tab>>>>,
    next_tab: AtomicUsize,
    max_chars: usize,
}

impl ChromeBrowser {
    pub fn new(max_chars: usize) -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            tabs: Arc::new(Mutex::new(HashMap::new())),
            next_tab: AtomicUsize::new(0),
            max_chars,
        }
    }

    fn tab(&self, id: &TabId) -> Result<Arc<Tab>, String> {
        self.tabs
            .lock()
            .map_err(|e| e.to_string())?
            .get(id)
            .cloned()
            .ok_or_else(|| format!("Unknown tab {}", id))
    }

    /// 在阻塞线程中对标签页执行同步操作
    async fn run<F>(&self, id: &TabId, f: F) -> ActionResult
    where
        F: FnOnce(&Arc<Tab>) -> Result<String, String> + Send + 'static,
    {
        let tab = match self.tab(id) {
            Ok(t) => t,
            Err(e) => return ActionResult::failed(e),
        };
        match tokio::task::spawn_blocking(move || f(&tab)).await {
            Ok(Ok(detail)) => ActionResult::ok(detail),
            Ok(Err(e)) => ActionResult::failed(e),
            Err(e) => ActionResult::failed(format!("Task join: {}", e)),
        }
    }
}

fn element_script(index: usize, action: &str) -> String {
    format!(
        r#"(function() {{
            const els = Array.from(document.querySelectorAll('{selector}'));
            const el = els[{index}];
            if (!el) return 'not found';
            el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
            {action}
            return 'ok';
        }})()"#,
        selector = INTERACTIVE_SELECTOR,
        index = index,
        action = action
    )
}

fn parse_ref(element_ref: &str) -> Result<usize, String> {
    element_ref
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| format!("Invalid element ref: {}", element_ref))
}

fn eval_status(tab: &Arc<Tab>, js: &str) -> Result<String, String> {
    let result = tab.evaluate(js, false).map_err(|e| format!("Evaluate failed: {}", e))?;
    let status = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    if status == "ok" {
        Ok(status)
    } else {
        Err(format!("Element {}", status))
    }
}

#[async_trait]
impl Actuator for ChromeBrowser {
    async fn create_tab(&self, url: Option<&str>) -> Result<TabId, String> {
        let browser = Arc::clone(&self.browser);
        let url = url.map(String::from);
        let tab = tokio::task::spawn_blocking(move || {
            let mut guard = browser.lock().map_err(|e| e.to_string())?;
            if guard.is_none() {
                *guard = Some(Browser::default().map_err(|e| format!("Chrome launch failed: {}", e))?);
            }
            let browser = guard.as_ref().ok_or_else(|| "Chrome not running".to_string())?;
            let tab = browser.new_tab().map_err(|e| format!("Browser tab failed: {}", e))?;
            if let Some(url) = url {
                tab.navigate_to(&url)
                    .and_then(|t| t.wait_until_navigated())
                    .map_err(|e| format!("Navigate failed: {}", e))?;
            }
            Ok::<_, String>(tab)
        })
        .await
        .map_err(|e| format!("Task join: {}", e))??;

        let id = TabId::new(format!("chrome-tab-{}", self.next_tab.fetch_add(1, Ordering::SeqCst) + 1));
        self.tabs
            .lock()
            .map_err(|e| e.to_string())?
            .insert(id.clone(), tab);
        Ok(id)
    }

    async fn close_tab(&self, tab: &TabId) -> ActionResult {
        let removed = match self.tabs.lock() {
            Ok(mut tabs) => tabs.remove(tab),
            Err(e) => return ActionResult::failed(e.to_string()),
        };
        let Some(handle) = removed else {
            return ActionResult::failed(format!("Unknown tab {}", tab));
        };
        let id = tab.clone();
        match tokio::task::spawn_blocking(move || handle.close(false)).await {
            Ok(Ok(_)) => ActionResult::ok(format!("Closed {}", id)),
            Ok(Err(e)) => ActionResult::failed(format!("Close failed: {}", e)),
            Err(e) => ActionResult::failed(format!("Task join: {}", e)),
        }
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> ActionResult {
        let url = url.to_string();
        self.run(tab, move |t| {
            t.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| format!("Navigate failed: {}", e))?;
            let title = t.get_title().unwrap_or_default();
            Ok(format!("Loaded \"{}\" ({})", title, t.get_url()))
        })
        .await
    }

    async fn click(&self, tab: &TabId, element_ref: &str) -> ActionResult {
        let index = match parse_ref(element_ref) {
            Ok(i) => i,
            Err(e) => return ActionResult::failed(e),
        };
        let label = element_ref.to_string();
        self.run(tab, move |t| {
            eval_status(t, &element_script(index, "el.click();"))?;
            Ok(format!("Clicked element [{}]", label))
        })
        .await
    }

    async fn fill(&self, tab: &TabId, element_ref: &str, text: &str) -> ActionResult {
        let index = match parse_ref(element_ref) {
            Ok(i) => i,
            Err(e) => return ActionResult::failed(e),
        };
        let label = element_ref.to_string();
        let text = text.to_string();
        let literal = serde_json::to_string(&text).unwrap_or_else(|_| "\"\"".to_string());
        let action = format!(
            "el.focus(); if ('value' in el) {{ el.value = {v}; }} else {{ el.textContent = {v}; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
            v = literal
        );
        self.run(tab, move |t| {
            eval_status(t, &element_script(index, &action))?;
            Ok(format!("Typed \"{}\" into element [{}]", text, label))
        })
        .await
    }

    async fn scroll(&self, tab: &TabId, direction: ScrollDirection) -> ActionResult {
        let amount = match direction {
            ScrollDirection::Up => -800,
            ScrollDirection::Down => 800,
        };
        self.run(tab, move |t| {
            t.evaluate(&format!("window.scrollBy(0, {})", amount), false)
                .map_err(|e| format!("Scroll failed: {}", e))?;
            Ok(format!("Scrolled {:?}", direction))
        })
        .await
    }

    async fn go_back(&self, tab: &TabId) -> ActionResult {
        self.run(tab, |t| {
            t.evaluate("window.history.back()", false)
                .map_err(|e| format!("Back failed: {}", e))?;
            Ok(format!("Went back ({})", t.get_url()))
        })
        .await
    }

    async fn go_forward(&self, tab: &TabId) -> ActionResult {
        self.run(tab, |t| {
            t.evaluate("window.history.forward()", false)
                .map_err(|e| format!("Forward failed: {}", e))?;
            Ok(format!("Went forward ({})", t.get_url()))
        })
        .await
    }

    async fn refresh(&self, tab: &TabId) -> ActionResult {
        self.run(tab, |t| {
            t.reload(false, None).map_err(|e| format!("Reload failed: {}", e))?;
            Ok(format!("Reloaded {}", t.get_url()))
        })
        .await
    }
}

#[async_trait]
impl PageInspector for ChromeBrowser {
    async fn read_flattened_page(&self, tab: &TabId) -> Result<String, String> {
        let handle = self.tab(tab)?;
        let max_chars = self.max_chars;
        tokio::task::spawn_blocking(move || {
            let title = handle.get_title().unwrap_or_default();
            let url = handle.get_url();
            let content = handle.get_content().map_err(|e| format!("Get content failed: {}", e))?;
            let text = html2text::from_read(content.as_bytes(), 120).unwrap_or_else(|_| content.clone());

            let list_js = format!(
                r#"JSON.stringify(Array.from(document.querySelectorAll('{}')).slice(0, 80).map(el => ({{
                    tag: (el.getAttribute('role') || el.tagName).toLowerCase(),
                    label: (el.innerText || el.value || el.getAttribute('aria-label') || el.getAttribute('placeholder') || '').trim().slice(0, 80)
                }})))"#,
                INTERACTIVE_SELECTOR
            );
            let elements: Vec<InteractiveElement> = handle
                .evaluate(&list_js, false)
                .ok()
                .and_then(|r| r.value)
                .and_then(|v| v.as_str().and_then(|s| serde_json::from_str(s).ok()))
                .unwrap_or_default();

            let mut out = format!("# {}\nURL: {}\n\n{}", title, url, truncate_chars(&text, max_chars));
            if !elements.is_empty() {
                out.push_str("\n\n## Interactive elements\n");
                for (i, el) in elements.iter().enumerate() {
                    out.push_str(&format!("[{}] {}: \"{}\"\n", i + 1, el.tag, el.label));
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| format!("Task join: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ref_is_one_based() {
        assert_eq!(parse_ref("1").unwrap(), 0);
        assert_eq!(parse_ref("[4]").unwrap(), 3);
        assert!(parse_ref("0").is_err());
        assert!(parse_ref("abc").is_err());
    }
}
