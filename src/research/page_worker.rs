//! Page Worker：在自己的标签页里读取一个搜索结果并写出摘要
//!
//! 每个 Worker 新建并最终关闭专属标签页，不与其他 Worker 共享浏览器或对话状态。
//! 工具循环有步数上限；超限、打不开、LLM 失败都记为不可访问摘要，只有取消会作为错误返回。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ResearchSection, ToolsSection};
use crate::core::{AgentError, RecoveryEngine};
use crate::memory::Message;
use crate::react::{parse_structured, run_tool_loop, LoopOutcome, Planner, ToolLoop};
use crate::research::types::{PageSummary, SearchResult};
use crate::tools::{browser_registry, truncate_chars, SharedBrowser, TabId, ToolExecutor};

/// Worker 最终回复
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkerReport {
    /// ok / inaccessible / irrelevant
    pub status: String,
    pub summary: String,
}

fn worker_prompt(max_challenge_retries: usize) -> String {
    format!(
        "You read one web page for a research task, inside your own browser tab. The page is already open.\n\
         - Use read_page to see the content.\n\
         - Cookie consent or verification screens: try to accept or pass them at most {retries} times, \
           then give up and report the page as inaccessible.\n\
         - If content loads lazily, scroll down to load it. Click \"read more\" or similar controls to expand text.\n\
         When done, reply with one JSON object: {{\"status\": \"ok\" | \"inaccessible\" | \"irrelevant\", \
         \"summary\": \"...\"}}. The summary covers only what this page says that is relevant to the goal; \
         do not add outside facts.",
        retries = max_challenge_retries
    )
}

/// 可在多个任务间共享的 Worker 配置
pub struct PageWorker {
    planner: Arc<Planner>,
    browser: SharedBrowser,
    research: ResearchSection,
    tools: ToolsSection,
}

impl PageWorker {
    pub fn new(planner: Arc<Planner>, browser: SharedBrowser, research: &ResearchSection, tools: &ToolsSection) -> Self {
        Self {
            planner,
            browser,
            research: research.clone(),
            tools: tools.clone(),
        }
    }

    /// 处理一个搜索结果；总会关闭自己打开的标签页，读取过程 panic 也不例外
    pub async fn run(&self, goal: &str, target: &SearchResult, cancel: &CancellationToken) -> Result<PageSummary, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let tab = match self.browser.create_tab(None).await {
            Ok(t) => t,
            Err(e) => return Ok(PageSummary::inaccessible(&target.url, format!("could not open a tab: {}", e))),
        };
        tracing::debug!(url = %target.url, tab = %tab, "page worker started");

        let result = match AssertUnwindSafe(self.read_page(goal, target, &tab, cancel))
            .catch_unwind()
            .await
        {
            Ok(r) => r,
            Err(_) => {
                tracing::error!(url = %target.url, tab = %tab, "page worker panicked");
                Ok(PageSummary::inaccessible(&target.url, "worker crashed"))
            }
        };

        let closed = self.browser.close_tab(&tab).await;
        if !closed.success {
            tracing::debug!(tab = %tab, detail = %closed.detail, "worker tab close failed");
        }
        let summary = result?;
        tracing::info!(url = %summary.url, accessible = summary.accessible, "page worker finished");
        Ok(summary)
    }

    async fn read_page(
        &self,
        goal: &str,
        target: &SearchResult,
        tab: &TabId,
        cancel: &CancellationToken,
    ) -> Result<PageSummary, AgentError> {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.browser.navigate(tab, &target.url) => r,
        };
        if !opened.success {
            return Ok(PageSummary::inaccessible(&target.url, opened.detail));
        }

        let registry = browser_registry(self.browser.clone(), tab.clone(), self.tools.max_page_chars);
        let executor = ToolExecutor::new(registry, self.tools.read_timeout_secs, self.tools.action_timeout_secs);
        let recovery = RecoveryEngine::new();
        let tool_loop = ToolLoop::new(&self.planner, &executor, &recovery, cancel.clone())
            .with_max_steps(self.research.max_worker_steps);
        let instruction = Message::user(format!(
            "Goal: {}\nPage: {} ({})",
            goal, target.title, target.url
        ));

        let result = match run_tool_loop(&tool_loop, &worker_prompt(self.research.max_challenge_retries), &[], instruction).await {
            Ok(r) => r,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(url = %target.url, error = %e, "page worker loop failed");
                return Ok(PageSummary::inaccessible(&target.url, e.to_string()));
            }
        };

        let answer = match result.outcome {
            LoopOutcome::Finished(answer) => answer,
            LoopOutcome::StepLimit(_) => {
                tracing::warn!(url = %target.url, steps = result.steps, "page worker hit round-trip limit");
                return Ok(PageSummary::inaccessible(
                    &target.url,
                    format!("round-trip limit of {} reached", self.research.max_worker_steps),
                ));
            }
        };

        let max_chars = self.research.max_summary_chars;
        let summary = match parse_structured::<WorkerReport>(&answer) {
            Ok(report) => match report.status.trim().to_lowercase().as_str() {
                "inaccessible" | "irrelevant" => PageSummary::inaccessible(
                    &target.url,
                    format!("{}: {}", report.status.trim(), truncate_chars(&report.summary, max_chars)),
                ),
                _ => PageSummary::new(&target.url, truncate_chars(&report.summary, max_chars)),
            },
            // 非 JSON 回复整体作为摘要
            Err(_) => PageSummary::new(&target.url, truncate_chars(answer.trim(), max_chars)),
        };
        Ok(summary)
    }
}
