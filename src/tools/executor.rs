//! 工具执行器
//!
//! 持有 ToolRegistry 与两档超时（只读 / 操作），execute(tool_name, args) 在超时内调用工具，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    read_timeout: Duration,
    action_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, read_timeout_secs: u64, action_timeout_secs: u64) -> Self {
        Self {
            registry,
            read_timeout: Duration::from_secs(read_timeout_secs),
            action_timeout: Duration::from_secs(action_timeout_secs),
        }
    }

    /// 执行指定工具；未注册返回 HallucinatedTool，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::HallucinatedTool(tool_name.to_string()))?;
        let limit = if tool.read_only() {
            self.read_timeout
        } else {
            self.action_timeout
        };

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(limit, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {}", tool_name, e))),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("element not found".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        reg.register(Broken);
        ToolExecutor::new(reg, 1, 1)
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let err = executor().execute("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(ref t) if t == "slow"));
    }

    #[tokio::test]
    async fn test_failure_maps_to_execution_failed() {
        let err = executor().execute("broken", Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(ref m) if m.contains("element not found")));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_hallucinated() {
        let err = executor().execute("teleport", Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::HallucinatedTool(_)));
    }
}
