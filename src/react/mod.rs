//! 推理层：Planner（调用与结构化输出）、工具循环、Critic（成功判定）

pub mod critic;
pub mod loop_;
pub mod planner;

pub use critic::{Critic, Verdict, DEFAULT_CRITIC_PROMPT};
pub use loop_::{run_tool_loop, LoopOutcome, LoopResult, ToolLoop};
pub use planner::{extract_json_block, parse_llm_output, parse_structured, Planner, PlannerOutput, ToolCall};
