//! 对话上下文
//!
//! 一次请求内按顺序追加的轮次（用户输入、工具调用记录、工具结果），在 LLM 调用之间传递。
//! 超过阈值时只保留最近的轮次，被裁掉的部分不可恢复。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 工具调用记录（assistant 侧）
    pub fn tool_call(tool: &str, args: &serde_json::Value) -> Self {
        Self::assistant(format!("Tool call: {} {}", tool, args))
    }

    /// 工具返回（user 侧，供下一轮推理）
    pub fn observation(tool: &str, observation: &str) -> Self {
        Self::user(format!("Observation from {}: {}", tool, observation))
    }
}

/// 运行中的对话上下文：只追加；trim 时丢弃最旧的轮次
#[derive(Clone, Debug)]
pub struct ConversationContext {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// 以已有历史初始化（如上一轮请求的对话）
    pub fn with_history(max_turns: usize, history: Vec<Message>) -> Self {
        let mut ctx = Self::new(max_turns);
        ctx.messages = history;
        ctx
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// 超出 max_turns 时丢弃最旧的消息，只保留最近部分；返回被丢弃的条数
    pub fn trim(&mut self) -> usize {
        if self.messages.len() <= self.max_turns {
            return 0;
        }
        let dropped = self.messages.len() - self.max_turns;
        self.messages.drain(..dropped);
        tracing::debug!(dropped, kept = self.max_turns, "conversation context trimmed");
        dropped
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
