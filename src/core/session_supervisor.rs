//! 会话监管：单次请求的生命周期与取消
//!
//! 每个顶层请求持有一个 CancellationToken；各阶段共享该 token，Page Worker 另派生子 token，外部放弃请求时一并停止。

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 请求级生命周期：会话 ID 与取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    session_id: String,
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（调用方放弃请求）
    pub fn cancel(&self) {
        tracing::info!(session_id = %self.session_id, "session cancelled");
        self.cancel_token.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children() {
        let supervisor = SessionSupervisor::new();
        let child = supervisor.cancel_token().child_token();
        assert!(!child.is_cancelled());
        supervisor.cancel();
        assert!(child.is_cancelled());
        assert!(supervisor.cancel_token().is_cancelled());
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionSupervisor::new().session_id(), SessionSupervisor::new().session_id());
    }
}
