//! 浏览器边界：操作层（Actuator）与页面读取（PageInspector）
//!
//! 引擎只依赖这两个 trait；标签页 ID 作为显式参数传入每次调用，绑定在每个 Worker / 请求自己的工具集里，
//! 不存在进程级的「当前标签页」。
//!
//! 实现：
//! - [`HttpBrowser`]：reqwest + html2text 的轻量实现（默认）
//! - `ChromeBrowser`：Headless Chrome（feature = "browser"）
//! - [`MockBrowser`]：测试用

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod mock;
pub mod tools;

#[cfg(feature = "browser")]
pub mod chrome;

pub use http::HttpBrowser;
pub use mock::MockBrowser;
pub use tools::browser_registry;

#[cfg(feature = "browser")]
pub use chrome::ChromeBrowser;

/// 标签页 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一次请求（或一个 Worker）的浏览上下文：会话 ID + 专属标签页
#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub session_id: String,
    pub tab: TabId,
}

/// 操作结果：成功与否 + 给模型看的说明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub detail: String,
}

impl ActionResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }

    pub fn into_result(self) -> Result<String, String> {
        if self.success {
            Ok(self.detail)
        } else {
            Err(self.detail)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// 浏览器操作层
#[async_trait]
pub trait Actuator: Send + Sync {
    /// 新建标签页，可选直接打开 URL
    async fn create_tab(&self, url: Option<&str>) -> Result<TabId, String>;

    async fn close_tab(&self, tab: &TabId) -> ActionResult;

    async fn navigate(&self, tab: &TabId, url: &str) -> ActionResult;

    /// element_ref 为页面快照中的元素编号（如 "3"）
    async fn click(&self, tab: &TabId, element_ref: &str) -> ActionResult;

    async fn fill(&self, tab: &TabId, element_ref: &str, text: &str) -> ActionResult;

    async fn scroll(&self, tab: &TabId, direction: ScrollDirection) -> ActionResult;

    async fn go_back(&self, tab: &TabId) -> ActionResult;

    async fn go_forward(&self, tab: &TabId) -> ActionResult;

    async fn refresh(&self, tab: &TabId) -> ActionResult;
}

/// 页面读取服务：返回当前页面的扁平化文本快照
#[async_trait]
pub trait PageInspector: Send + Sync {
    async fn read_flattened_page(&self, tab: &TabId) -> Result<String, String>;
}

/// 同时具备操作与读取能力的浏览器
pub trait BrowserDriver: Actuator + PageInspector {}

impl<T: Actuator + PageInspector> BrowserDriver for T {}

pub type SharedBrowser = Arc<dyn BrowserDriver>;

/// 按字符数截断，追加截断标记
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}
