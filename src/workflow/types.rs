//! 行动流水线数据类型
//!
//! PlanItem 同时用于 Task 与 Subtask；OrchestrationState 为一次请求的完整编排状态。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 计划项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PlanStatus {
    /// 状态只能向前推进；唯一例外是重规划时的 failed -> pending
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, InProgress | Completed | Failed) => true,
            (InProgress, Completed | Failed) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

/// Task / Subtask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    /// 列表内唯一，从 "1" 开始递增
    pub id: String,
    pub label: String,
    pub description: String,
    pub status: PlanStatus,
    /// 结果说明，只追加
    #[serde(default)]
    pub results: Vec<String>,
}

impl PlanItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: description.into(),
            status: PlanStatus::Pending,
            results: Vec::new(),
        }
    }

    /// 设置状态；非法转换被拒绝并返回 false
    pub fn set_status(&mut self, next: PlanStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(id = %self.id, from = ?self.status, to = ?next, "rejected plan status transition");
            false
        }
    }

    pub fn push_result(&mut self, note: impl Into<String>) {
        self.results.push(note.into());
    }

    pub fn last_result(&self) -> Option<&str> {
        self.results.last().map(String::as_str)
    }

    pub fn is_completed(&self) -> bool {
        self.status == PlanStatus::Completed
    }
}

/// LLM 产出的计划项（只含 label 与 description，id 与状态由引擎分配）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ItemDraft {
    /// 简短标题
    pub label: String,
    /// 完整说明
    pub description: String,
}

/// 将草稿转为 PlanItem 列表，id 依次为 "1".."n"
pub fn plan_from_drafts(drafts: Vec<ItemDraft>) -> Vec<PlanItem> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| PlanItem::new((i + 1).to_string(), d.label.trim(), d.description.trim()))
        .collect()
}

/// 计划的一行文本表示，用于 prompt
pub fn render_plan(plan: &[PlanItem]) -> String {
    plan.iter()
        .map(|item| {
            let mut line = format!("{}. [{:?}] {}: {}", item.id, item.status, item.label, item.description);
            if let Some(note) = item.last_result() {
                line.push_str(&format!(" (result: {})", note));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 行动流水线编排状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub task_plan: Vec<PlanItem>,
    /// 只对当前 Task 有意义；Task 切换时清空或整体替换
    pub subtask_plan: Vec<PlanItem>,
    /// None 表示无当前 Task（已结束）
    pub current_task_index: Option<usize>,
    pub current_subtask_index: usize,
    /// 当前 Task 已发生的重规划次数
    #[serde(default)]
    pub replan_attempts: usize,
}

impl OrchestrationState {
    /// 以新的 Task 计划开始，当前 Task 为第 0 项
    pub fn with_task_plan(task_plan: Vec<PlanItem>) -> Self {
        Self {
            task_plan,
            subtask_plan: Vec::new(),
            current_task_index: Some(0),
            current_subtask_index: 0,
            replan_attempts: 0,
        }
    }

    pub fn current_task(&self) -> Option<&PlanItem> {
        self.current_task_index.and_then(|i| self.task_plan.get(i))
    }

    pub fn all_tasks_completed(&self) -> bool {
        !self.task_plan.is_empty() && self.task_plan.iter().all(PlanItem::is_completed)
    }

    /// 当前 Subtask 计划非空且全部完成
    pub fn subtasks_completed(&self) -> bool {
        !self.subtask_plan.is_empty() && self.subtask_plan.iter().all(PlanItem::is_completed)
    }

    pub fn failed_subtask(&self) -> Option<&PlanItem> {
        self.subtask_plan.iter().find(|s| s.status == PlanStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_forward_only() {
        use PlanStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(Pending));
    }

    #[test]
    fn test_set_status_rejects_backwards_move() {
        let mut item = PlanItem::new("1", "a", "b");
        assert!(item.set_status(PlanStatus::Completed));
        assert!(!item.set_status(PlanStatus::InProgress));
        assert_eq!(item.status, PlanStatus::Completed);
    }

    #[test]
    fn test_plan_from_drafts_assigns_sequential_ids() {
        let plan = plan_from_drafts(vec![
            ItemDraft { label: " Open ".into(), description: "open site".into() },
            ItemDraft { label: "Search".into(), description: "search it".into() },
        ]);
        assert_eq!(plan.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(plan[0].label, "Open");
        assert!(plan.iter().all(|p| p.status == PlanStatus::Pending && p.results.is_empty()));
    }

    #[test]
    fn test_empty_subtask_plan_is_not_completed() {
        let state = OrchestrationState::with_task_plan(vec![PlanItem::new("1", "a", "b")]);
        assert!(!state.subtasks_completed());
        assert!(!state.all_tasks_completed());
        assert_eq!(state.current_task().map(|t| t.id.as_str()), Some("1"));
    }

    #[test]
    fn test_render_plan_includes_last_result() {
        let mut item = PlanItem::new("1", "Login", "log in");
        item.push_result("button missing");
        let text = render_plan(&[item]);
        assert!(text.contains("1. [Pending] Login: log in"));
        assert!(text.contains("button missing"));
    }
}
