//! Router：在 action / research 两种模式间二选一

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Message;
use crate::react::Planner;

/// 请求模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 在页面上完成操作
    Action,
    /// 搜索多个来源并汇总成报告
    Research,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "action" => Ok(Mode::Action),
            "research" => Ok(Mode::Research),
            other => Err(format!("unknown mode '{}', expected action or research", other)),
        }
    }
}

/// 模型给出的选择
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RouteDecision {
    pub mode: Mode,
    /// 选择理由
    #[serde(default)]
    pub reason: String,
}

const ROUTER_PROMPT: &str = "You route browser-agent requests. Choose exactly one mode:\n\
- action: the user wants something done on web pages (open, click, fill forms, buy, book, log in).\n\
- research: the user wants information gathered from several sources and summarized into a report.";

/// 对目标做一次分类；无法得到合法选择时返回 ClassificationFailed
pub async fn classify(planner: &Planner, goal: &str, history: &[Message]) -> Result<Mode, AgentError> {
    let mut messages = history.to_vec();
    messages.push(Message::user(format!("Request: {}", goal)));

    match planner.ask_structured::<RouteDecision>(ROUTER_PROMPT, &messages).await {
        Ok(decision) => {
            tracing::info!(mode = ?decision.mode, reason = %decision.reason, "request routed");
            Ok(decision.mode)
        }
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => Err(AgentError::ClassificationFailed(e.to_string())),
    }
}
