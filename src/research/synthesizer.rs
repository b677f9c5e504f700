//! Synthesizer：汇总所有页面摘要为一份 Markdown 报告
//!
//! 只在 fan-in 闸门打开后运行。模型只负责标题、执行摘要与分主题小节（用 [n] 标注来源），
//! 目录与引用列表由引擎根据已处理的来源生成。模型调用失败时退化为逐来源列出摘要的报告。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Message;
use crate::react::Planner;
use crate::research::types::{PageSummary, ResearchState, ResearchStatus};

/// 结构化输出：报告正文
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportDraft {
    pub title: String,
    /// 跨来源的综合结论
    pub executive_summary: String,
    /// 按主题分组的发现
    pub sections: Vec<ReportSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportSection {
    pub heading: String,
    /// 正文，用 [n] 标注来源编号
    pub body: String,
}

/// 编号后的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub number: usize,
    pub url: String,
    pub title: String,
    pub summary: String,
}

const SYNTHESIS_PROMPT: &str = "You write research reports from numbered source summaries.\n\
Write an executive summary that synthesizes across sources, then group findings into thematic sections. \
Attribute every claim inline with the source number, e.g. [2]. \
Use only facts stated in the summaries; do not add outside knowledge.";

/// 可访问的摘要按 URL 排序后编号，保证与 Worker 完成顺序无关
pub fn number_sources(state: &ResearchState) -> Vec<Source> {
    let titles: HashMap<&str, &str> = state
        .search_results
        .iter()
        .map(|r| (r.url.as_str(), r.title.as_str()))
        .collect();
    let mut accessible: Vec<&PageSummary> = state.accessible_summaries().collect();
    accessible.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.summary.cmp(&b.summary)));
    accessible
        .into_iter()
        .enumerate()
        .map(|(i, s)| Source {
            number: i + 1,
            url: s.url.clone(),
            title: titles
                .get(s.url.as_str())
                .filter(|t| !t.trim().is_empty())
                .map(|t| t.trim().to_string())
                .unwrap_or_else(|| s.url.clone()),
            summary: s.summary.clone(),
        })
        .collect()
}

fn slug(heading: &str) -> String {
    let mut out = String::new();
    for c in heading.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if (c == ' ' || c == '-') && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// 渲染 Markdown：标题、目录、执行摘要、各小节、来源列表
pub fn render_report(draft: &ReportDraft, sources: &[Source], unavailable: &[&PageSummary]) -> String {
    let mut headings = vec!["Executive Summary".to_string()];
    headings.extend(draft.sections.iter().map(|s| s.heading.trim().to_string()));
    headings.push("Sources".to_string());

    let mut out = format!(
        "# {}\n\n_Generated {}_\n\n## Table of Contents\n",
        draft.title.trim(),
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    );
    for (i, h) in headings.iter().enumerate() {
        out.push_str(&format!("{}. [{}](#{})\n", i + 1, h, slug(h)));
    }
    out.push_str(&format!("\n## Executive Summary\n\n{}\n", draft.executive_summary.trim()));
    for section in &draft.sections {
        out.push_str(&format!("\n## {}\n\n{}\n", section.heading.trim(), section.body.trim()));
    }
    out.push_str("\n## Sources\n\n");
    for s in sources {
        out.push_str(&format!("[{}] {}. <{}>\n", s.number, s.title, s.url));
    }
    if !unavailable.is_empty() {
        out.push_str("\nNot included (unavailable or irrelevant):\n");
        for s in unavailable {
            out.push_str(&format!("- <{}>: {}\n", s.url, s.summary));
        }
    }
    out
}

/// 模型不可用时的报告：逐来源列出摘要
fn fallback_draft(goal: &str, sources: &[Source]) -> ReportDraft {
    let executive_summary = if sources.is_empty() {
        "None of the sources could be read, so no findings are available.".to_string()
    } else {
        format!("Findings from {} sources are listed below without further synthesis.", sources.len())
    };
    ReportDraft {
        title: format!("Research: {}", goal),
        executive_summary,
        sections: sources
            .iter()
            .map(|s| ReportSection {
                heading: s.title.clone(),
                body: format!("{} [{}]", s.summary, s.number),
            })
            .collect(),
    }
}

/// 生成最终报告并把状态置为 completed；闸门未开时返回 false 且不做任何事
pub async fn synthesize(planner: &Planner, goal: &str, state: &mut ResearchState) -> Result<bool, AgentError> {
    if !state.ready_for_synthesis() {
        tracing::debug!(
            processed = state.processed_urls.len(),
            total = state.search_results.len(),
            "fan-in gate closed, synthesis deferred"
        );
        return Ok(false);
    }

    let sources = number_sources(state);
    let draft = if sources.is_empty() {
        fallback_draft(goal, &sources)
    } else {
        let listing = sources
            .iter()
            .map(|s| format!("[{}] {} ({})\n{}", s.number, s.title, s.url, s.summary))
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = Message::user(format!("Research goal: {}\n\n## Sources\n{}", goal, listing));
        match planner.ask_structured::<ReportDraft>(SYNTHESIS_PROMPT, &[request]).await {
            Ok(draft) => draft,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "report synthesis failed, listing summaries instead");
                fallback_draft(goal, &sources)
            }
        }
    };

    let unavailable: Vec<&PageSummary> = state.page_summaries.iter().filter(|s| !s.accessible).collect();
    let report = render_report(&draft, &sources, &unavailable);
    state.final_report = report;
    state.status = ResearchStatus::Completed;
    tracing::info!(sources = sources.len(), "research report completed");
    Ok(true)
}
