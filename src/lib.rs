//! bee-pilot - 分层浏览器任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 主控流程、错误与恢复、状态推送、会话监管、Worker 并发池
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 请求内对话上下文
//! - **react**: Planner、工具循环、Critic 判定
//! - **workflow**: 行动流水线（Router、Action Planner、Task Executor、Action Executor）
//! - **research**: 研究流水线（Search Planner、Page Worker、协调者、Synthesizer）
//! - **tools**: 工具注册表、执行器与浏览器边界

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod react;
pub mod research;
pub mod tools;
pub mod workflow;
