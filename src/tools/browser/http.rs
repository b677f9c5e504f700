//! HTTP 浏览器：reqwest 抓取 + html2text 转文本
//!
//! 不执行 JS，适合静态页面与搜索结果页。每个标签页维护自己的历史、滚动位置与链接编号；
//! click([n]) 打开第 n 个链接，fill 只记录字段值（不提交表单）。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio::sync::Mutex;

use crate::config::ToolsSection;
use crate::tools::browser::{
    truncate_chars, ActionResult, Actuator, PageInspector, ScrollDirection, TabId,
};

/// 快照中列出的最大链接数
const MAX_LINKS: usize = 60;
/// html2text 折行宽度
const TEXT_WIDTH: usize = 120;

#[derive(Debug, Clone)]
struct Link {
    text: String,
    href: String,
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    title: String,
    text: String,
    links: Vec<Link>,
}

#[derive(Debug, Default)]
struct HttpTab {
    history: Vec<String>,
    cursor: usize,
    page: Option<LoadedPage>,
    scroll: usize,
    fields: BTreeMap<String, String>,
}

/// 加载成功后历史游标如何移动
#[derive(Debug, Clone, Copy)]
enum HistoryMove {
    Push,
    Stay,
    Seek(usize),
}

impl HttpTab {
    fn load(&mut self, page: LoadedPage, history: HistoryMove) {
        match history {
            HistoryMove::Push => {
                if !self.history.is_empty() {
                    self.history.truncate(self.cursor + 1);
                }
                self.history.push(page.url.clone());
                self.cursor = self.history.len() - 1;
            }
            HistoryMove::Seek(index) if index < self.history.len() => self.cursor = index,
            HistoryMove::Seek(_) | HistoryMove::Stay => {}
        }
        self.page = Some(page);
        self.scroll = 0;
        self.fields.clear();
    }
}

/// 基于 HTTP 抓取的浏览器实现
pub struct HttpBrowser {
    client: reqwest::Client,
    tabs: Mutex<HashMap<TabId, HttpTab>>,
    next_tab: AtomicUsize,
    /// 每屏字符数；scroll 以此为步长
    window_chars: usize,
}

impl HttpBrowser {
    pub fn new(cfg: &ToolsSection) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.action_timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("HTTP client build failed: {}", e))?;
        Ok(Self {
            client,
            tabs: Mutex::new(HashMap::new()),
            next_tab: AtomicUsize::new(0),
            window_chars: cfg.max_page_chars.max(500),
        })
    }

    async fn fetch(&self, url: &str) -> Result<LoadedPage, String> {
        tracing::debug!(url = %url, "http browser fetch");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        let status = resp.status();
        let final_url = resp.url().clone();
        if !status.is_success() {
            return Err(format!("HTTP {} for {}", status, final_url));
        }
        let html = resp.text().await.map_err(|e| format!("Read body failed: {}", e))?;
        Ok(parse_page(&final_url, &html))
    }

    /// 抓取在锁外进行，多个标签页可并行加载；失败时标签页状态不变
    async fn open(&self, tab: &TabId, url: &str, history: HistoryMove) -> ActionResult {
        if !self.tabs.lock().await.contains_key(tab) {
            return ActionResult::failed(format!("Unknown tab {}", tab));
        }
        match self.fetch(url).await {
            Ok(page) => {
                let title = page.title.clone();
                let final_url = page.url.clone();
                let mut tabs = self.tabs.lock().await;
                match tabs.get_mut(tab) {
                    Some(t) => {
                        t.load(page, history);
                        ActionResult::ok(format!("Loaded \"{}\" ({})", title, final_url))
                    }
                    None => ActionResult::failed(format!("Tab {} closed during load", tab)),
                }
            }
            Err(e) => ActionResult::failed(e),
        }
    }

    /// 只计算目标位置，游标在 open 成功后才移动
    async fn history_target(&self, tab: &TabId, delta: isize) -> Result<(usize, String), String> {
        let tabs = self.tabs.lock().await;
        let t = tabs.get(tab).ok_or_else(|| format!("Unknown tab {}", tab))?;
        let target = t.cursor as isize + delta;
        if target < 0 || target as usize >= t.history.len() {
            return Err(if delta < 0 {
                "No previous page".to_string()
            } else {
                "No next page".to_string()
            });
        }
        let index = target as usize;
        Ok((index, t.history[index].clone()))
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 用 HTML 解析器取标题与链接；片段锚点与非 http(s) 链接不编号
fn parse_page(base: &reqwest::Url, html: &str) -> LoadedPage {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| collapse_ws(&el.text().collect::<String>()))
        .unwrap_or_default();

    let links = match Selector::parse("a[href]") {
        Ok(sel) => document
            .select(&sel)
            .filter_map(|el| {
                let raw = el.value().attr("href")?.trim();
                if raw.is_empty() || raw.starts_with('#') {
                    return None;
                }
                let href = base.join(raw).ok()?;
                if !matches!(href.scheme(), "http" | "https") {
                    return None;
                }
                Some(Link {
                    text: collapse_ws(&el.text().collect::<String>()),
                    href: href.to_string(),
                })
            })
            .take(MAX_LINKS)
            .collect(),
        Err(_) => Vec::new(),
    };

    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH).unwrap_or_else(|_| html.to_string());

    LoadedPage {
        url: base.to_string(),
        title,
        text,
        links,
    }
}

#[async_trait]
impl Actuator for HttpBrowser {
    async fn create_tab(&self, url: Option<&str>) -> Result<TabId, String> {
        let n = self.next_tab.fetch_add(1, Ordering::SeqCst) + 1;
        let id = TabId::new(format!("http-tab-{}", n));
        self.tabs.lock().await.insert(id.clone(), HttpTab::default());
        if let Some(url) = url {
            let result = self.open(&id, url, HistoryMove::Push).await;
            if !result.success {
                tracing::warn!(tab = %id, url = %url, detail = %result.detail, "initial load failed");
            }
        }
        Ok(id)
    }

    async fn close_tab(&self, tab: &TabId) -> ActionResult {
        match self.tabs.lock().await.remove(tab) {
            Some(_) => ActionResult::ok(format!("Closed {}", tab)),
            None => ActionResult::failed(format!("Unknown tab {}", tab)),
        }
    }

    async fn navigate(&self, tab: &TabId, url: &str) -> ActionResult {
        self.open(tab, url, HistoryMove::Push).await
    }

    async fn click(&self, tab: &TabId, element_ref: &str) -> ActionResult {
        let Ok(index) = element_ref.trim_matches(|c| c == '[' || c == ']').parse::<usize>() else {
            return ActionResult::failed(format!("Invalid element ref: {}", element_ref));
        };
        let href = {
            let tabs = self.tabs.lock().await;
            let Some(t) = tabs.get(tab) else {
                return ActionResult::failed(format!("Unknown tab {}", tab));
            };
            let Some(page) = &t.page else {
                return ActionResult::failed("No page loaded");
            };
            match index.checked_sub(1).and_then(|i| page.links.get(i)) {
                Some(link) => link.href.clone(),
                None => {
                    return ActionResult::failed(format!(
                        "Element ref [{}] not found ({} links on page)",
                        index,
                        page.links.len()
                    ))
                }
            }
        };
        self.open(tab, &href, HistoryMove::Push).await
    }

    async fn fill(&self, tab: &TabId, element_ref: &str, text: &str) -> ActionResult {
        let mut tabs = self.tabs.lock().await;
        match tabs.get_mut(tab) {
            Some(t) => {
                t.fields.insert(element_ref.to_string(), text.to_string());
                ActionResult::ok(format!(
                    "Recorded \"{}\" for field [{}] (static session: forms are not submitted)",
                    text, element_ref
                ))
            }
            None => ActionResult::failed(format!("Unknown tab {}", tab)),
        }
    }

    async fn scroll(&self, tab: &TabId, direction: ScrollDirection) -> ActionResult {
        let mut tabs = self.tabs.lock().await;
        let Some(t) = tabs.get_mut(tab) else {
            return ActionResult::failed(format!("Unknown tab {}", tab));
        };
        let Some(page) = &t.page else {
            return ActionResult::failed("No page loaded");
        };
        let total = page.text.chars().count();
        let step = self.window_chars / 2;
        t.scroll = match direction {
            ScrollDirection::Down if t.scroll + step < total => t.scroll + step,
            ScrollDirection::Down => return ActionResult::ok("Already at the bottom of the page"),
            ScrollDirection::Up => t.scroll.saturating_sub(step),
        };
        ActionResult::ok(format!("Scrolled {:?} to offset {}/{}", direction, t.scroll, total))
    }

    async fn go_back(&self, tab: &TabId) -> ActionResult {
        match self.history_target(tab, -1).await {
            Ok((index, url)) => self.open(tab, &url, HistoryMove::Seek(index)).await,
            Err(e) => ActionResult::failed(e),
        }
    }

    async fn go_forward(&self, tab: &TabId) -> ActionResult {
        match self.history_target(tab, 1).await {
            Ok((index, url)) => self.open(tab, &url, HistoryMove::Seek(index)).await,
            Err(e) => ActionResult::failed(e),
        }
    }

    async fn refresh(&self, tab: &TabId) -> ActionResult {
        let current = {
            let tabs = self.tabs.lock().await;
            tabs.get(tab).and_then(|t| t.page.as_ref().map(|p| p.url.clone()))
        };
        match current {
            Some(url) => self.open(tab, &url, HistoryMove::Stay).await,
            None => ActionResult::failed("No page loaded"),
        }
    }
}

#[async_trait]
impl PageInspector for HttpBrowser {
    async fn read_flattened_page(&self, tab: &TabId) -> Result<String, String> {
        let tabs = self.tabs.lock().await;
        let t = tabs.get(tab).ok_or_else(|| format!("Unknown tab {}", tab))?;
        let Some(page) = &t.page else {
            return Ok("URL: about:blank".to_string());
        };

        let window: String = page
            .text
            .chars()
            .skip(t.scroll)
            .take(self.window_chars)
            .collect();
        let mut out = format!("# {}\nURL: {}\n\n{}", page.title, page.url, window);
        if !page.links.is_empty() {
            out.push_str("\n\n## Links\n");
            for (i, link) in page.links.iter().enumerate() {
                out.push_str(&format!("[{}] {} -> {}\n", i + 1, link.text, link.href));
            }
        }
        if !t.fields.is_empty() {
            out.push_str("\n## Filled fields\n");
            for (r, v) in &t.fields {
                out.push_str(&format!("[{}] = \"{}\"\n", r, v));
            }
        }
        Ok(truncate_chars(&out, self.window_chars * 2))
    }
}
