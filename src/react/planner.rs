//! Planner：LLM 调用、Tool Call 解析与结构化输出
//!
//! parse_llm_output 从文本中提取 JSON：带非空 "tool" 字段的是 ToolCall，其余视为最终回复。
//! ask_structured 把目标类型的 JSON Schema 拼进 system prompt，解析失败时注入纠正提示并有限次重试。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::schema_json;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "navigate", "args": {"url": "..."}}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Planner 输出
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 最终回复（自由文本或不含 tool 的 JSON）
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 提取 JSON 块（```json ... ``` 或首个 '{' 到最后一个 '}'）
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为 ToolCall，否则为 Response
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json_block(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    match value.get("tool").and_then(|t| t.as_str()) {
        Some(tool) if !tool.trim().is_empty() => Ok(PlannerOutput::ToolCall(ToolCall {
            tool: tool.trim().to_string(),
            args: value.get("args").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        })),
        _ => Ok(PlannerOutput::Response(json_str.to_string())),
    }
}

/// 将文本中的 JSON 块反序列化为 T
pub fn parse_structured<T: DeserializeOwned>(output: &str) -> Result<T, AgentError> {
    let json_str = extract_json_block(output)
        .ok_or_else(|| AgentError::JsonParseError(format!("no JSON object in: {}", output.trim())))?;
    serde_json::from_str(json_str).map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))
}

/// Planner：持有 LLM 与恢复引擎，负责普通调用与结构化调用
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
    structured_retries: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, structured_retries: usize) -> Self {
        Self {
            llm,
            recovery: RecoveryEngine::new(),
            structured_retries,
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 拼 system + messages 后调用 LLM
    pub async fn plan_with_system(&self, messages: &[Message], system: &str) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(system.to_string()));
        full_messages.extend_from_slice(messages);
        Ok(self.llm.complete(&full_messages).await?)
    }

    /// 结构化调用：要求回复符合 T 的 JSON Schema；格式错误时按 RecoveryEngine 的提示重试
    pub async fn ask_structured<T>(&self, system: &str, messages: &[Message]) -> Result<T, AgentError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let system = format!(
            "{}\n\n## Output format\nReply with a single JSON object that matches this JSON Schema, and nothing else:\n{}",
            system,
            schema_json::<T>()
        );
        let mut conversation = messages.to_vec();
        let mut attempt = 0;
        loop {
            let output = self.plan_with_system(&conversation, &system).await?;
            let err = match parse_structured::<T>(&output) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if attempt >= self.structured_retries {
                return Err(err);
            }
            match self.recovery.handle(&err) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::warn!(attempt, error = %err, "structured output rejected, retrying");
                    conversation.push(Message::assistant(output));
                    conversation.push(Message::user(prompt));
                }
                _ => return Err(err),
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Pick {
        choice: String,
    }

    #[test]
    fn test_parse_tool_call() {
        let out = parse_llm_output(r#"{"tool": "navigate", "args": {"url": "https://a.test"}}"#).unwrap();
        match out {
            PlannerOutput::ToolCall(tc) => {
                assert_eq!(tc.tool, "navigate");
                assert_eq!(tc.args["url"], "https://a.test");
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fenced_tool_call_without_args() {
        let out = parse_llm_output("Let me look.\n```json\n{\"tool\": \"read_page\"}\n```").unwrap();
        assert!(matches!(out, PlannerOutput::ToolCall(ref tc) if tc.tool == "read_page" && tc.args.is_object()));
    }

    #[test]
    fn test_json_without_tool_is_response() {
        let out = parse_llm_output(r#"Done: {"isSuccessful": true, "explanation": "ok"}"#).unwrap();
        assert!(matches!(out, PlannerOutput::Response(ref r) if r.starts_with('{')));
    }

    #[test]
    fn test_plain_text_is_response() {
        let out = parse_llm_output("  the button was clicked  ").unwrap();
        assert!(matches!(out, PlannerOutput::Response(ref r) if r == "the button was clicked"));
    }

    #[test]
    fn test_broken_json_is_parse_error() {
        assert!(matches!(
            parse_llm_output(r#"{"tool": "click", "args": {"ref": }"#),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_ask_structured_retries_then_succeeds() {
        let llm = Arc::new(MockLlmClient::scripted(["not json at all", r#"{"choice": "b"}"#]));
        let planner = Planner::new(llm.clone(), 2);
        let pick: Pick = planner
            .ask_structured("Pick one", &[Message::user("a or b?")])
            .await
            .unwrap();
        assert_eq!(pick.choice, "b");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_ask_structured_gives_up_after_retries() {
        let llm = Arc::new(MockLlmClient::new(|_| Ok("nope".to_string())));
        let planner = Planner::new(llm.clone(), 1);
        let res: Result<Pick, _> = planner.ask_structured("Pick one", &[]).await;
        assert!(matches!(res, Err(AgentError::JsonParseError(_))));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_schema_is_injected_into_system_prompt() {
        let llm = Arc::new(MockLlmClient::new(|msgs| {
            assert!(msgs[0].content.contains("\"choice\""));
            Ok(r#"{"choice": "a"}"#.to_string())
        }));
        let planner = Planner::new(llm, 0);
        let pick: Pick = planner.ask_structured("Pick one", &[]).await.unwrap();
        assert_eq!(pick.choice, "a");
    }
}
