//! 研究流水线数据类型
//!
//! page_summaries 与 processed_urls 只追加；合并即列表拼接，与 Worker 完成顺序无关。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 搜索候选
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// 单个页面的摘要
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub summary: String,
    /// false 表示页面无法访问或与目标无关
    #[serde(default = "default_true")]
    pub accessible: bool,
}

fn default_true() -> bool {
    true
}

/// 不可访问页面的摘要前缀
pub const INACCESSIBLE_PREFIX: &str = "inaccessible";

impl PageSummary {
    pub fn new(url: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            summary: summary.into(),
            accessible: true,
        }
    }

    pub fn inaccessible(url: impl Into<String>, reason: impl AsRef<str>) -> Self {
        Self {
            url: url.into(),
            summary: format!("{}: {}", INACCESSIBLE_PREFIX, reason.as_ref()),
            accessible: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Running,
    Completed,
}

/// 研究流水线状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchState {
    pub search_results: Vec<SearchResult>,
    pub page_summaries: Vec<PageSummary>,
    pub processed_urls: Vec<String>,
    pub final_report: String,
    pub status: ResearchStatus,
}

impl ResearchState {
    pub fn new(search_results: Vec<SearchResult>) -> Self {
        Self {
            search_results,
            ..Self::default()
        }
    }

    /// 合并一个 Worker 的输出
    pub fn merge(&mut self, summary: PageSummary) {
        self.processed_urls.push(summary.url.clone());
        self.page_summaries.push(summary);
    }

    /// fan-in 闸门：所有搜索结果都已处理
    pub fn ready_for_synthesis(&self) -> bool {
        self.processed_urls.len() >= self.search_results.len()
    }

    pub fn accessible_summaries(&self) -> impl Iterator<Item = &PageSummary> {
        self.page_summaries.iter().filter(|s| s.accessible)
    }
}
