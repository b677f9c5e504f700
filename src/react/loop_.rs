//! 工具调用主循环
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan，直到模型给出不含 tool 的最终回复或达到最大步数。
//! 工具失败与超时写成 "Error: ..." Observation 交给模型继续推理，不向上抛出；LLM 错误与取消向上返回。

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::Message;
use crate::react::planner::{parse_llm_output, PlannerOutput};
use crate::react::Planner;
use crate::tools::ToolExecutor;

/// Observation 日志预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 循环结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// 模型给出最终回复
    Finished(String),
    /// 达到步数上限，附最后一次模型输出
    StepLimit(String),
}

/// 循环结果：结束方式、本次循环新增的轮次、消耗步数
#[derive(Debug)]
pub struct LoopResult {
    pub outcome: LoopOutcome,
    pub turns: Vec<Message>,
    pub steps: usize,
}

/// 工具循环会话配置
pub struct ToolLoop<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
}

impl<'a> ToolLoop<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            max_steps: 20,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// 拼接基础 system prompt 与可用工具说明
    pub fn system_prompt(&self, base: &str) -> String {
        format!(
            "{}\n\n{}\nTo call a tool, reply with exactly one JSON object: {{\"tool\": \"<name>\", \"args\": {{...}}}}. \
             Call one tool at a time and wait for its observation. \
             When you are finished, reply without a \"tool\" key.",
            base,
            self.executor.registry().prompt_section()
        )
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 执行工具循环
///
/// history 为之前的上下文（只读），instruction 为本次循环的任务说明；返回的 turns 从 instruction 开始。
pub async fn run_tool_loop(
    session: &ToolLoop<'_>,
    base_system: &str,
    history: &[Message],
    instruction: Message,
) -> Result<LoopResult, AgentError> {
    let system = session.system_prompt(base_system);
    let mut turns = vec![instruction];
    let mut step = 0;
    let mut last_output = String::new();

    loop {
        if session.cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if step >= session.max_steps {
            tracing::warn!(max_steps = session.max_steps, "tool loop reached step limit");
            return Ok(LoopResult {
                outcome: LoopOutcome::StepLimit(last_output),
                turns,
                steps: step,
            });
        }

        let mut messages = history.to_vec();
        messages.extend(turns.iter().cloned());

        let output = tokio::select! {
            _ = session.cancel_token.cancelled() => return Err(AgentError::Cancelled),
            out = session.planner.plan_with_system(&messages, &system) => out?,
        };
        last_output = output.clone();
        step += 1;

        match parse_llm_output(&output) {
            Ok(PlannerOutput::Response(answer)) => {
                turns.push(Message::assistant(answer.clone()));
                return Ok(LoopResult {
                    outcome: LoopOutcome::Finished(answer),
                    turns,
                    steps: step,
                });
            }
            Ok(PlannerOutput::ToolCall(tc)) => {
                tracing::debug!(step, tool = %tc.tool, args = %tc.args, "tool call");
                turns.push(Message::tool_call(&tc.tool, &tc.args));

                let observation = tokio::select! {
                    _ = session.cancel_token.cancelled() => return Err(AgentError::Cancelled),
                    res = session.executor.execute(&tc.tool, tc.args) => res,
                };
                let observation = match observation {
                    Ok(content) => content,
                    Err(e) => match session.recovery.handle(&e) {
                        RecoveryAction::Observe(obs) => obs,
                        RecoveryAction::RetryWithPrompt(prompt) => format!(
                            "Error: {}. Valid tools: {}",
                            prompt,
                            session.executor.tool_names().join(", ")
                        ),
                        RecoveryAction::Abort => format!("Error: {}", e),
                    },
                };
                tracing::debug!(tool = %tc.tool, observation = %preview(&observation), "observation");
                turns.push(Message::observation(&tc.tool, &observation));
            }
            Err(e) => match session.recovery.handle(&e) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    turns.push(Message::assistant(output));
                    turns.push(Message::user(prompt));
                }
                _ => return Err(e),
            },
        }
    }
}
