//! 编排状态推送
//!
//! 每次状态变化后把快照写入 watch 通道，订阅方（CLI 或其他进度界面）总能读到最后一次一致的状态。

use serde::Serialize;
use tokio::sync::watch;

use crate::research::{ResearchState, ResearchStatus, SearchResult};
use crate::workflow::{OrchestrationState, PlanItem};

/// 行动流水线快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionSnapshot {
    pub task_plan: Vec<PlanItem>,
    pub subtask_plan: Vec<PlanItem>,
    pub current_task_index: Option<usize>,
    pub current_subtask_index: usize,
}

impl From<&OrchestrationState> for ActionSnapshot {
    fn from(s: &OrchestrationState) -> Self {
        Self {
            task_plan: s.task_plan.clone(),
            subtask_plan: s.subtask_plan.clone(),
            current_task_index: s.current_task_index,
            current_subtask_index: s.current_subtask_index,
        }
    }
}

/// 研究流水线快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResearchSnapshot {
    pub search_results: Vec<SearchResult>,
    pub processed_urls: Vec<String>,
    pub final_report: String,
    pub status: ResearchStatus,
}

impl From<&ResearchState> for ResearchSnapshot {
    fn from(s: &ResearchState) -> Self {
        Self {
            search_results: s.search_results.clone(),
            processed_urls: s.processed_urls.clone(),
            final_report: s.final_report.clone(),
            status: s.status,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "pipeline", rename_all = "snake_case")]
pub enum StatusSnapshot {
    #[default]
    Idle,
    Action(ActionSnapshot),
    Research(ResearchSnapshot),
    /// 请求以终止性错误结束
    Failed { error: String },
}

/// 状态推送端，可廉价克隆
#[derive(Clone, Debug)]
pub struct StatusFeed {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusFeed {
    pub fn new() -> (Self, watch::Receiver<StatusSnapshot>) {
        let (tx, rx) = watch::channel(StatusSnapshot::Idle);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// 没有订阅者时也会更新当前值
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn publish_action(&self, state: &OrchestrationState) {
        self.publish(StatusSnapshot::Action(state.into()));
    }

    pub fn publish_research(&self, state: &ResearchState) {
        self.publish(StatusSnapshot::Research(state.into()));
    }

    pub fn current(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::PlanItem;

    #[tokio::test]
    async fn test_subscriber_sees_latest_snapshot() {
        let (feed, mut rx) = StatusFeed::new();
        let state = OrchestrationState::with_task_plan(vec![PlanItem::new("1", "a", "b")]);
        feed.publish_action(&state);

        rx.changed().await.unwrap();
        match &*rx.borrow() {
            StatusSnapshot::Action(s) => {
                assert_eq!(s.current_task_index, Some(0));
                assert_eq!(s.task_plan.len(), 1);
            }
            other => panic!("Expected action snapshot, got {:?}", other),
        };
    }

    #[test]
    fn test_publish_without_subscribers_keeps_value() {
        let feed = StatusFeed::default();
        feed.publish_research(&ResearchState::default());
        assert!(matches!(feed.current(), StatusSnapshot::Research(_)));
    }

    #[test]
    fn test_snapshot_serializes_with_pipeline_tag() {
        let json = serde_json::to_value(StatusSnapshot::Failed { error: "x".into() }).unwrap();
        assert_eq!(json["pipeline"], "failed");
    }
}
