//! 引擎错误类型与恢复动作
//!
//! 只有分类失败、计划生成失败、配置错误与取消会离开引擎；工具错误与超时在工具循环内被吸收为 Observation。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// Router 无法在 action / research 间做出选择
    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    /// 无法得到合法的 Task / Subtask / 搜索结果列表
    #[error("Plan generation failed: {0}")]
    PlanGenerationFailed(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否属于终止整个请求的错误（其余错误都在 Subtask / Worker 边界内被吸收）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentError::ClassificationFailed(_)
                | AgentError::PlanGenerationFailed(_)
                | AgentError::Config(_)
                | AgentError::Cancelled
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 把错误作为 Observation 交给模型继续推理
    Observe(String),
    /// 终止当前循环
    Abort,
}
