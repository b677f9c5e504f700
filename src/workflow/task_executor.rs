//! Task Executor：Task 级状态机
//!
//! 每次控制权回到这里调用一次 [`advance`]：
//! 1. 当前 Subtask 计划全部完成 -> 当前 Task 标记 completed，索引前移；
//! 2. 无当前 Task / 全部完成 / 越界 -> terminated，清空 Subtask 计划；
//! 3. 否则当前 Task 置为 in_progress，构造分解请求（上一轮有失败项时附带失败上下文）。
//!
//! [`decompose`] 调用模型产出新的 Subtask 计划，整体替换旧计划。重规划次数超过上限时 Task 标记 failed 并终止。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Message;
use crate::react::Planner;
use crate::workflow::types::{plan_from_drafts, render_plan, ItemDraft, OrchestrationState, PlanItem, PlanStatus};

/// 上一轮 Subtask 失败时的上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    /// 完整的上一轮 Subtask 计划（含已完成项的结果）
    pub prior_plan: Vec<PlanItem>,
    pub failed_item: PlanItem,
    pub last_result: Option<String>,
}

/// 分解请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompositionRequest {
    pub task: PlanItem,
    pub task_plan: Vec<PlanItem>,
    pub failure: Option<FailureContext>,
}

/// 状态机一步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// 工作流结束；completed 表示所有 Task 均已完成
    Terminated { completed: bool },
    /// 需要为当前 Task 生成 Subtask 计划
    Decompose(DecompositionRequest),
}

fn terminate(state: &mut OrchestrationState) -> TaskStep {
    state.current_task_index = None;
    state.current_subtask_index = 0;
    state.subtask_plan.clear();
    TaskStep::Terminated {
        completed: state.all_tasks_completed(),
    }
}

/// 推进状态机（纯状态变换，不调用模型）
pub fn advance(state: &mut OrchestrationState, max_replans: usize) -> TaskStep {
    // 1. completing-current
    if let Some(idx) = state.current_task_index {
        if state.subtasks_completed() {
            if let Some(task) = state.task_plan.get_mut(idx) {
                if task.status == PlanStatus::Pending {
                    task.set_status(PlanStatus::InProgress);
                }
                task.set_status(PlanStatus::Completed);
                tracing::info!(task_id = %task.id, "task completed");
            }
            state.current_task_index = Some(idx + 1);
            state.current_subtask_index = 0;
            state.subtask_plan.clear();
            state.replan_attempts = 0;
        }
    }

    // 2. terminated
    let idx = match state.current_task_index {
        Some(i) if i < state.task_plan.len() && !state.all_tasks_completed() => i,
        _ => return terminate(state),
    };

    // 3. selecting / decomposing
    let failure = state.failed_subtask().cloned().map(|failed_item| FailureContext {
        prior_plan: state.subtask_plan.clone(),
        last_result: failed_item.last_result().map(String::from),
        failed_item,
    });
    if failure.is_some() {
        state.replan_attempts += 1;
        if state.replan_attempts > max_replans {
            let task = &mut state.task_plan[idx];
            task.set_status(PlanStatus::Failed);
            task.push_result(format!("Gave up after {} replanning attempts", max_replans));
            tracing::warn!(task_id = %task.id, max_replans, "replan limit reached, terminating");
            return terminate(state);
        }
        tracing::info!(
            task_id = %state.task_plan[idx].id,
            attempt = state.replan_attempts,
            "replanning subtasks after failure"
        );
    }

    let task = &mut state.task_plan[idx];
    if task.status == PlanStatus::Pending {
        task.set_status(PlanStatus::InProgress);
    }
    TaskStep::Decompose(DecompositionRequest {
        task: task.clone(),
        task_plan: state.task_plan.clone(),
        failure,
    })
}

/// 结构化输出：Subtask 列表
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubtaskList {
    /// 按执行顺序排列的 Subtask
    pub subtasks: Vec<ItemDraft>,
}

const DECOMPOSE_PROMPT: &str = "You break one task of a browser automation plan into ordered subtasks.\n\
Each subtask is an instruction a browsing agent can carry out with a few tool calls \
(for example \"Search the site for wireless headphones\"). \
Do not break subtasks down into single clicks or keystrokes; the executing agent decides those.";

/// 构造分解请求的 user 消息
pub fn render_request(goal: &str, req: &DecompositionRequest) -> String {
    let mut out = format!(
        "Overall goal: {}\n\n## Task plan\n{}\n\n## Current task\n{}: {}",
        goal,
        render_plan(&req.task_plan),
        req.task.label,
        req.task.description
    );
    if let Some(failure) = &req.failure {
        out.push_str(&format!(
            "\n\n## Previous attempt failed\nPrevious subtask plan:\n{}\n\nFailed subtask: {}: {}\nLast result: {}\n\n\
             Replan the subtasks for the current task. Account for this failure. You may keep subtasks that \
             already succeeded. Do not repeat the failed approach unchanged.",
            render_plan(&failure.prior_plan),
            failure.failed_item.label,
            failure.failed_item.description,
            failure.last_result.as_deref().unwrap_or("(none)")
        ));
    }
    out
}

/// 调用模型生成 Subtask 计划
pub async fn decompose(
    planner: &Planner,
    goal: &str,
    req: &DecompositionRequest,
    history: &[Message],
) -> Result<Vec<PlanItem>, AgentError> {
    let mut messages = history.to_vec();
    messages.push(Message::user(render_request(goal, req)));

    let list = match planner.ask_structured::<SubtaskList>(DECOMPOSE_PROMPT, &messages).await {
        Ok(list) => list,
        Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
        Err(e) => return Err(AgentError::PlanGenerationFailed(e.to_string())),
    };
    if list.subtasks.is_empty() {
        return Err(AgentError::PlanGenerationFailed(format!(
            "no subtasks for task {}",
            req.task.id
        )));
    }
    let plan = plan_from_drafts(list.subtasks);
    tracing::info!(task_id = %req.task.id, subtasks = plan.len(), "subtask plan created");
    Ok(plan)
}

/// 以新 Subtask 计划整体替换旧计划
pub fn install_subtasks(state: &mut OrchestrationState, plan: Vec<PlanItem>) {
    state.subtask_plan = plan;
    state.current_subtask_index = 0;
}
