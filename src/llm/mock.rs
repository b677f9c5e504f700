//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 三种用法：默认回显最后一条 User 消息；按顺序吐出预置回复；或由闭包根据消息内容决定回复（并发场景下更稳定）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

type Handler = dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync;

/// Mock 客户端
pub struct MockLlmClient {
    handler: Box<Handler>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    /// 由闭包决定每次回复
    pub fn new(
        handler: impl Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        }
    }

    /// 依次返回预置回复，用完后返回 EmptyResponse
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(responses.into_iter().map(Into::into).collect());
        Self::new(move |_| {
            queue
                .lock()
                .map_err(|e| LlmError::Request(e.to_string()))?
                .pop_front()
                .ok_or(LlmError::EmptyResponse)
        })
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(|messages| {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            Ok(format!("Echo from Mock: {}", last_user))
        })
    }
}

impl std::fmt::Debug for MockLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLlmClient")
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(messages)
    }
}
