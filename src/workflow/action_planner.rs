//! Action Planner：目标 -> 有序 Task 列表

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::EngineSection;
use crate::core::AgentError;
use crate::memory::Message;
use crate::react::Planner;
use crate::workflow::types::{plan_from_drafts, ItemDraft, OrchestrationState};

/// 结构化输出：Task 列表
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskList {
    /// 按执行顺序排列的 Task
    pub tasks: Vec<ItemDraft>,
}

fn planner_prompt(min_tasks: usize, max_tasks: usize) -> String {
    format!(
        "You plan work for a browser automation agent.\n\
         Break the user's goal into {min}-{max} ordered tasks. Each task states WHAT to achieve, not HOW \
         (no individual clicks or keystrokes). Each task must make sense using only what earlier tasks \
         produced; never refer to the output of a later task.",
        min = min_tasks,
        max = max_tasks
    )
}

/// 生成 Task 计划，返回当前 Task 为第 0 项的初始编排状态
pub async fn plan_tasks(
    planner: &Planner,
    cfg: &EngineSection,
    goal: &str,
    history: &[Message],
) -> Result<OrchestrationState, AgentError> {
    let mut messages = history.to_vec();
    messages.push(Message::user(format!("Goal: {}", goal)));

    let list = match planner
        .ask_structured::<TaskList>(&planner_prompt(cfg.min_tasks, cfg.max_tasks), &messages)
        .await
    {
        Ok(list) => list,
        Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
        Err(e) => return Err(AgentError::PlanGenerationFailed(e.to_string())),
    };

    let mut drafts: Vec<ItemDraft> = list
        .tasks
        .into_iter()
        .filter(|d| !d.label.trim().is_empty() || !d.description.trim().is_empty())
        .collect();
    if drafts.is_empty() {
        return Err(AgentError::PlanGenerationFailed("task list is empty".to_string()));
    }
    let max_tasks = cfg.max_tasks.max(1);
    if drafts.len() > max_tasks {
        tracing::warn!(count = drafts.len(), max_tasks, "task list truncated");
        drafts.truncate(max_tasks);
    }
    if drafts.len() < cfg.min_tasks {
        tracing::warn!(count = drafts.len(), min_tasks = cfg.min_tasks, "task list shorter than requested");
    }

    let state = OrchestrationState::with_task_plan(plan_from_drafts(drafts));
    tracing::info!(tasks = state.task_plan.len(), "task plan created");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::workflow::types::PlanStatus;
    use std::sync::Arc;

    fn task_json(n: usize) -> String {
        let tasks: Vec<String> = (1..=n)
            .map(|i| format!(r#"{{"label": "Task {i}", "description": "do step {i}"}}"#))
            .collect();
        format!(r#"{{"tasks": [{}]}}"#, tasks.join(","))
    }

    #[tokio::test]
    async fn test_plan_tasks_initial_state() {
        let reply = task_json(3);
        let llm = Arc::new(MockLlmClient::new(move |_| Ok(reply.clone())));
        let planner = Planner::new(llm, 0);
        let state = plan_tasks(&planner, &EngineSection::default(), "book a table", &[])
            .await
            .unwrap();
        assert_eq!(state.task_plan.len(), 3);
        assert_eq!(state.current_task_index, Some(0));
        assert_eq!(state.current_subtask_index, 0);
        assert!(state.subtask_plan.is_empty());
        assert!(state.task_plan.iter().all(|t| t.status == PlanStatus::Pending));
    }

    #[tokio::test]
    async fn test_plan_tasks_truncates_to_max() {
        let reply = task_json(14);
        let llm = Arc::new(MockLlmClient::new(move |_| Ok(reply.clone())));
        let planner = Planner::new(llm, 0);
        let state = plan_tasks(&planner, &EngineSection::default(), "x", &[]).await.unwrap();
        assert_eq!(state.task_plan.len(), 10);
        assert_eq!(state.task_plan[9].id, "10");
    }

    #[tokio::test]
    async fn test_empty_plan_is_plan_generation_failure() {
        let llm = Arc::new(MockLlmClient::new(|_| Ok(r#"{"tasks": []}"#.to_string())));
        let planner = Planner::new(llm, 0);
        let err = plan_tasks(&planner, &EngineSection::default(), "x", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanGenerationFailed(_)));
    }

    #[tokio::test]
    async fn test_unparseable_plan_is_plan_generation_failure() {
        let llm = Arc::new(MockLlmClient::new(|_| Ok("I cannot plan this".to_string())));
        let planner = Planner::new(llm, 1);
        let err = plan_tasks(&planner, &EngineSection::default(), "x", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanGenerationFailed(_)));
    }
}
