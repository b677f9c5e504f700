//! Search Planner：一次探索性搜索，抽取候选结果
//!
//! 在独立标签页打开搜索入口，让模型用浏览器工具完成搜索，再结合最新页面快照以结构化输出给出 {url, title} 列表。
//! 候选经过校验、去重、广告/站点导航过滤并截断到上限；一个都不剩时返回 PlanGenerationFailed。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ResearchSection, ToolsSection};
use crate::core::{AgentError, RecoveryEngine};
use crate::memory::Message;
use crate::react::{run_tool_loop, LoopOutcome, Planner, ToolLoop};
use crate::research::types::SearchResult;
use crate::tools::{browser_registry, truncate_chars, SharedBrowser, TabId, ToolExecutor};

/// 结构化输出：候选结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateList {
    /// 与目标相关的内容页，不含广告与站点导航
    pub results: Vec<SearchResult>,
}

fn ad_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(doubleclick\.net|googleadservices\.com|googlesyndication\.com|adservice\.|/aclk\b|/pagead/|duckduckgo\.com/y\.js|bing\.com/aclick)",
        )
        .unwrap_or_else(|e| panic!("invalid ad regex: {e}"))
    })
}

fn chrome_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^/(login|signin|signup|register|account|privacy|terms|settings|preferences|help|about)/?$")
            .unwrap_or_else(|e| panic!("invalid chrome path regex: {e}"))
    })
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || matches!(key.as_str(), "gclid" | "msclkid" | "fbclid")
}

/// 去掉跟踪参数，其余查询参数保持原顺序
fn strip_tracking(url: &mut reqwest::Url) {
    if url.query().is_none() {
        return;
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// 把 {query} 替换为目标文本（按查询参数编码）
pub fn build_search_url(template: &str, query: &str) -> Result<String, String> {
    const MARKER: &str = "__pilot_query__";
    let mut url = reqwest::Url::parse(&template.replace("{query}", MARKER))
        .map_err(|e| format!("invalid search url {}: {}", template, e))?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.replace(MARKER, query)))
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Ok(url.to_string())
}

/// 校验、去重、过滤广告与导航页，截断到 max_results
pub fn filter_candidates(candidates: Vec<SearchResult>, search_host: Option<&str>, max_results: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in candidates {
        let Ok(mut url) = reqwest::Url::parse(c.url.trim()) else {
            tracing::debug!(url = %c.url, "dropped unparseable candidate");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            continue;
        }
        if ad_regex().is_match(url.as_str()) {
            tracing::debug!(url = %url, "dropped ad candidate");
            continue;
        }
        if search_host.is_some() && url.host_str() == search_host {
            continue;
        }
        if chrome_path_regex().is_match(url.path()) && url.query().is_none() {
            tracing::debug!(url = %url, "dropped navigation candidate");
            continue;
        }
        url.set_fragment(None);
        strip_tracking(&mut url);
        let key = url.as_str().trim_end_matches('/').to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        out.push(SearchResult {
            url: url.to_string(),
            title: c.title.trim().to_string(),
        });
        if out.len() >= max_results {
            break;
        }
    }
    out
}

const SEARCH_SYSTEM_PROMPT: &str = "You are a research assistant controlling one browser tab that shows a web search page.\n\
Run one good search for the user's goal (refine the query once if the results are poor). \
When the result list is visible, reply in plain text with the most relevant result pages.";

fn extraction_prompt(min: usize, max: usize) -> String {
    format!(
        "Extract {min}-{max} search results that are real content pages relevant to the goal. \
         Skip ads, sponsored links, the search engine's own pages and site navigation. \
         Use absolute http(s) URLs exactly as shown on the page."
    )
}

/// 搜索并返回候选结果
pub async fn plan_search(
    planner: &Planner,
    browser: &SharedBrowser,
    research: &ResearchSection,
    tools: &ToolsSection,
    goal: &str,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>, AgentError> {
    let start_url = build_search_url(&research.search_url, goal).map_err(AgentError::Config)?;
    let search_host = reqwest::Url::parse(&start_url)
        .ok()
        .and_then(|u| u.host_str().map(String::from));

    let tab = browser
        .create_tab(Some(&start_url))
        .await
        .map_err(|e| AgentError::PlanGenerationFailed(format!("could not open search page: {}", e)))?;

    let result = search_in_tab(planner, browser, research, tools, goal, &tab, cancel).await;
    let closed = browser.close_tab(&tab).await;
    if !closed.success {
        tracing::debug!(tab = %tab, detail = %closed.detail, "search tab close failed");
    }
    let candidates = result?;

    let results = filter_candidates(candidates, search_host.as_deref(), research.max_results.max(1));
    if results.is_empty() {
        return Err(AgentError::PlanGenerationFailed("search produced no usable results".to_string()));
    }
    if results.len() < research.min_results {
        tracing::warn!(count = results.len(), min_results = research.min_results, "fewer search results than requested");
    }
    tracing::info!(count = results.len(), "search results planned");
    Ok(results)
}

async fn search_in_tab(
    planner: &Planner,
    browser: &SharedBrowser,
    research: &ResearchSection,
    tools: &ToolsSection,
    goal: &str,
    tab: &TabId,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>, AgentError> {
    let registry = browser_registry(browser.clone(), tab.clone(), tools.max_page_chars);
    let executor = ToolExecutor::new(registry, tools.read_timeout_secs, tools.action_timeout_secs);
    let recovery = RecoveryEngine::new();
    let tool_loop = ToolLoop::new(planner, &executor, &recovery, cancel.clone()).with_max_steps(research.max_worker_steps);

    let notes = match run_tool_loop(&tool_loop, SEARCH_SYSTEM_PROMPT, &[], Message::user(format!("Goal: {}", goal))).await {
        Ok(r) => match r.outcome {
            LoopOutcome::Finished(text) | LoopOutcome::StepLimit(text) => text,
        },
        Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
        Err(e) => return Err(AgentError::PlanGenerationFailed(e.to_string())),
    };

    let page = browser
        .read_flattened_page(tab)
        .await
        .unwrap_or_else(|e| format!("(page could not be read: {})", e));
    let request = Message::user(format!(
        "Goal: {}\n\n## Search notes\n{}\n\n## Current page\n{}",
        goal,
        notes,
        truncate_chars(&page, tools.max_page_chars)
    ));

    let prompt = extraction_prompt(research.min_results, research.max_results);
    let messages = [request];
    let extracted = tokio::select! {
        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
        r = planner.ask_structured::<CandidateList>(&prompt, &messages) => r,
    };
    match extracted {
        Ok(list) => Ok(list.results),
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => Err(AgentError::PlanGenerationFailed(e.to_string())),
    }
}
