//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供工具循环与结构化输出决定是重试、记录为 Observation 还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed as JSON: {raw}. \
                Reply with exactly one valid JSON object and nothing else: no prose, no Markdown fences. \
                To call a tool use {{\"tool\": \"<name>\", \"args\": {{...}}}}."
            )),
            AgentError::HallucinatedTool(name) => RecoveryAction::RetryWithPrompt(format!(
                "Tool '{name}' does not exist. Use only the tools listed in the instructions."
            )),
            AgentError::ToolTimeout(tool) => {
                RecoveryAction::Observe(format!("Error: tool {tool} timed out"))
            }
            AgentError::ToolExecutionFailed(msg) => RecoveryAction::Observe(format!("Error: {msg}")),
            _ => RecoveryAction::Abort,
        }
    }
}
