//! 核心编排层：错误与恢复、状态推送、会话监管、Worker 并发池、主控流程

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod worker_pool;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{
    create_browser_from_config, create_engine, create_llm_from_config, spawn_engine, ActionOutcome, Command, Engine,
    EngineOutcome, ResearchOutcome, RunReport,
};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{ActionSnapshot, ResearchSnapshot, StatusFeed, StatusSnapshot};
pub use worker_pool::WorkerPool;
