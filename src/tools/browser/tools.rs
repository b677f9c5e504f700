//! 暴露给模型的浏览器工具
//!
//! 每个工具在构造时绑定 (浏览器, 标签页)，因此同一个注册表只会操作自己的标签页。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::browser::{truncate_chars, ScrollDirection, SharedBrowser, TabId};
use crate::tools::{Tool, ToolRegistry};

/// 为指定标签页构建完整的浏览器工具集
pub fn browser_registry(browser: SharedBrowser, tab: TabId, max_page_chars: usize) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(NavigateTool::new(browser.clone(), tab.clone()));
    reg.register(ClickTool::new(browser.clone(), tab.clone()));
    reg.register(FillTool::new(browser.clone(), tab.clone()));
    reg.register(ScrollTool::new(browser.clone(), tab.clone()));
    for kind in [HistoryKind::Back, HistoryKind::Forward, HistoryKind::Refresh] {
        reg.register(HistoryTool {
            browser: browser.clone(),
            tab: tab.clone(),
            kind,
        });
    }
    reg.register(ReadPageTool {
        browser,
        tab,
        max_chars: max_page_chars,
    });
    reg
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing {}", key))
}

/// 元素编号既可能是数字也可能是字符串
fn ref_arg(args: &Value) -> Result<String, String> {
    match args.get("ref") {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err("Missing ref (element reference ID)".to_string()),
    }
}

pub struct NavigateTool {
    browser: SharedBrowser,
    tab: TabId,
}

impl NavigateTool {
    pub fn new(browser: SharedBrowser, tab: TabId) -> Self {
        Self { browser, tab }
    }
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        "navigate"
    }

    fn description(&self) -> &str {
        "Open a URL in the current tab."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = str_arg(&args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Invalid URL (http/https only): {}", url));
        }
        self.browser.navigate(&self.tab, url).await.into_result()
    }
}

pub struct ClickTool {
    browser: SharedBrowser,
    tab: TabId,
}

impl ClickTool {
    pub fn new(browser: SharedBrowser, tab: TabId) -> Self {
        Self { browser, tab }
    }
}

#[async_trait]
impl Tool for ClickTool {
    fn name(&self) -> &str {
        "click"
    }

    fn description(&self) -> &str {
        "Click an element by its reference number from read_page, e.g. [3]."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ref": { "type": ["integer", "string"] } },
            "required": ["ref"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let element = ref_arg(&args)?;
        self.browser.click(&self.tab, &element).await.into_result()
    }
}

pub struct FillTool {
    browser: SharedBrowser,
    tab: TabId,
}

impl FillTool {
    pub fn new(browser: SharedBrowser, tab: TabId) -> Self {
        Self { browser, tab }
    }
}

#[async_trait]
impl Tool for FillTool {
    fn name(&self) -> &str {
        "fill"
    }

    fn description(&self) -> &str {
        "Type text into an input element by its reference number."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ref": { "type": ["integer", "string"] },
                "text": { "type": "string" }
            },
            "required": ["ref", "text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let element = ref_arg(&args)?;
        let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        self.browser.fill(&self.tab, &element, text).await.into_result()
    }
}

pub struct ScrollTool {
    browser: SharedBrowser,
    tab: TabId,
}

impl ScrollTool {
    pub fn new(browser: SharedBrowser, tab: TabId) -> Self {
        Self { browser, tab }
    }
}

#[async_trait]
impl Tool for ScrollTool {
    fn name(&self) -> &str {
        "scroll"
    }

    fn description(&self) -> &str {
        "Scroll the page up or down (also triggers lazily loaded content)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "direction": { "type": "string", "enum": ["up", "down"] } },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let direction = match args.get("direction").and_then(|v| v.as_str()) {
            Some("up") => ScrollDirection::Up,
            _ => ScrollDirection::Down,
        };
        self.browser.scroll(&self.tab, direction).await.into_result()
    }
}

#[derive(Debug, Clone, Copy)]
enum HistoryKind {
    Back,
    Forward,
    Refresh,
}

/// go_back / go_forward / refresh
pub struct HistoryTool {
    browser: SharedBrowser,
    tab: TabId,
    kind: HistoryKind,
}

#[async_trait]
impl Tool for HistoryTool {
    fn name(&self) -> &str {
        match self.kind {
            HistoryKind::Back => "go_back",
            HistoryKind::Forward => "go_forward",
            HistoryKind::Refresh => "refresh",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            HistoryKind::Back => "Go back one page in the tab history.",
            HistoryKind::Forward => "Go forward one page in the tab history.",
            HistoryKind::Refresh => "Reload the current page.",
        }
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let result = match self.kind {
            HistoryKind::Back => self.browser.go_back(&self.tab).await,
            HistoryKind::Forward => self.browser.go_forward(&self.tab).await,
            HistoryKind::Refresh => self.browser.refresh(&self.tab).await,
        };
        result.into_result()
    }
}

/// 读取当前页面的扁平化快照（只读，短超时）
pub struct ReadPageTool {
    browser: SharedBrowser,
    tab: TabId,
    max_chars: usize,
}

#[async_trait]
impl Tool for ReadPageTool {
    fn name(&self) -> &str {
        "read_page"
    }

    fn description(&self) -> &str {
        "Read a text snapshot of the current page, with numbered interactive elements."
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let text = self.browser.read_flattened_page(&self.tab).await?;
        Ok(truncate_chars(&text, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::browser::{Actuator, MockBrowser};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_registry_exposes_all_browser_tools() {
        let browser = Arc::new(MockBrowser::new());
        let tab = browser.create_tab(None).await.unwrap();
        let reg = browser_registry(browser, tab, 1000);
        for name in [
            "navigate", "click", "fill", "scroll", "go_back", "go_forward", "refresh", "read_page",
        ] {
            assert!(reg.contains(name), "missing {}", name);
        }
        assert!(reg.get("read_page").unwrap().read_only());
        assert!(!reg.get("navigate").unwrap().read_only());
    }

    #[tokio::test]
    async fn test_tools_are_bound_to_their_tab() {
        let browser = Arc::new(MockBrowser::new().with_page("https://a.test/", "page A"));
        let tab_a = browser.create_tab(None).await.unwrap();
        let tab_b = browser.create_tab(None).await.unwrap();
        let reg_a = browser_registry(browser.clone(), tab_a.clone(), 1000);

        reg_a
            .get("navigate")
            .unwrap()
            .execute(json!({"url": "https://a.test/"}))
            .await
            .unwrap();

        assert!(browser.read_page_text(&tab_a).contains("page A"));
        assert!(!browser.read_page_text(&tab_b).contains("page A"));
    }

    #[tokio::test]
    async fn test_navigate_rejects_non_http_urls() {
        let browser = Arc::new(MockBrowser::new());
        let tab = browser.create_tab(None).await.unwrap();
        let reg = browser_registry(browser, tab, 1000);
        let err = reg
            .get("navigate")
            .unwrap()
            .execute(json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap_err();
        assert!(err.contains("Invalid URL"));
    }

    #[test]
    fn test_ref_arg_accepts_numbers_and_strings() {
        assert_eq!(ref_arg(&json!({"ref": 3})).unwrap(), "3");
        assert_eq!(ref_arg(&json!({"ref": " 7 "})).unwrap(), "7");
        assert!(ref_arg(&json!({})).is_err());
    }
}
