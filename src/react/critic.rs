//! Critic：Subtask 成功判定
//!
//! 工具循环结束后，用一次新的页面读取加上本次循环的操作记录，让模型给出 {isSuccessful, explanation}。
//! 页面读取失败时把错误写进 prompt，仍由模型判定（通常判为失败）。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{Message, Role};
use crate::react::Planner;
use crate::tools::{truncate_chars, BrowserDriver, TabId};

/// 默认判定模板，占位符：{subtask}、{transcript}、{page}
pub const DEFAULT_CRITIC_PROMPT: &str = "You verify whether a browser subtask was accomplished.\n\n\
## Subtask\n{subtask}\n\n\
## Actions taken\n{transcript}\n\n\
## Current page\n{page}\n\n\
Judge only from the current page and the actions above. \
Set isSuccessful to true only if the subtask is visibly done. \
Explain briefly what you observed.";

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Subtask 是否完成
    #[serde(alias = "is_successful")]
    pub is_successful: bool,
    /// 判定依据
    #[serde(default)]
    pub explanation: String,
}

impl Verdict {
    pub fn failed(explanation: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            explanation: explanation.into(),
        }
    }
}

/// Critic：持有 prompt 模板
pub struct Critic {
    prompt_template: String,
    max_page_chars: usize,
}

impl Critic {
    pub fn new(prompt_template: impl Into<String>, max_page_chars: usize) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            max_page_chars,
        }
    }

    /// 将工具循环的轮次压成简短的操作记录
    fn transcript(turns: &[Message]) -> String {
        let lines: Vec<String> = turns
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let who = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                format!("- {}: {}", who, truncate_chars(&m.content, 400))
            })
            .collect();
        if lines.is_empty() {
            "(no actions)".to_string()
        } else {
            lines.join("\n")
        }
    }

    pub fn render_prompt(&self, subtask: &str, turns: &[Message], page: &str) -> String {
        self.prompt_template
            .replace("{subtask}", subtask)
            .replace("{transcript}", &Self::transcript(turns))
            .replace("{page}", page)
    }

    /// 读取标签页最新内容后请求结构化判定
    pub async fn judge(
        &self,
        planner: &Planner,
        browser: &dyn BrowserDriver,
        tab: &TabId,
        subtask: &str,
        turns: &[Message],
    ) -> Result<Verdict, AgentError> {
        let page = match browser.read_flattened_page(tab).await {
            Ok(text) => truncate_chars(&text, self.max_page_chars),
            Err(e) => format!("(page could not be read: {})", e),
        };
        let prompt = self.render_prompt(subtask, turns, &page);
        planner
            .ask_structured::<Verdict>("You are a strict reviewer of browser automation results.", &[Message::user(prompt)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::{Actuator, MockBrowser};
    use std::sync::Arc;

    #[test]
    fn test_verdict_accepts_both_spellings() {
        let a: Verdict = serde_json::from_str(r#"{"isSuccessful": true, "explanation": "ok"}"#).unwrap();
        let b: Verdict = serde_json::from_str(r#"{"is_successful": false}"#).unwrap();
        assert!(a.is_successful);
        assert!(!b.is_successful);
        assert!(b.explanation.is_empty());
    }

    #[test]
    fn test_render_prompt_fills_placeholders() {
        let critic = Critic::new(DEFAULT_CRITIC_PROMPT, 8000);
        let prompt = critic.render_prompt(
            "Open the login page",
            &[Message::user("do it"), Message::assistant("done")],
            "URL: https://a.test/login",
        );
        assert!(prompt.contains("Open the login page"));
        assert!(prompt.contains("- assistant: done"));
        assert!(prompt.contains("https://a.test/login"));
        assert!(!prompt.contains("{page}"));
    }

    #[tokio::test]
    async fn test_judge_reads_fresh_page() {
        let browser = MockBrowser::new().with_page("https://a.test/", "Logged in as bob");
        let tab = browser.create_tab(Some("https://a.test/")).await.unwrap();
        let llm = Arc::new(MockLlmClient::new(|msgs| {
            let prompt = &msgs.last().map(|m| m.content.clone()).unwrap_or_default();
            let ok = prompt.contains("Logged in as bob");
            Ok(format!(r#"{{"isSuccessful": {}, "explanation": "checked page"}}"#, ok))
        }));
        let planner = Planner::new(llm, 0);

        let verdict = Critic::new(DEFAULT_CRITIC_PROMPT, 8000)
            .judge(&planner, &browser, &tab, "Log in", &[])
            .await
            .unwrap();
        assert!(verdict.is_successful);
        assert!(browser.calls().iter().any(|c| c.starts_with("read_page")));
    }
}
