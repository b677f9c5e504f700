//! 记忆层：请求内的对话上下文（追加写入、按轮数裁剪）

pub mod conversation;

pub use conversation::{ConversationContext, Message, Role};
