//! Action Executor：按顺序执行当前 Subtask 计划
//!
//! 每个 Subtask 跑一轮工具循环，再由 Critic 结合最新页面给出判定；失败即停，剩余 Subtask 保持 pending，
//! 控制权交回 Task Executor 重规划。成功的 Subtask 其工具轮次并入运行上下文，超出上限时裁剪最旧部分。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{EngineSection, ToolsSection};
use crate::core::{AgentError, RecoveryEngine, StatusFeed};
use crate::memory::{ConversationContext, Message};
use crate::react::{run_tool_loop, Critic, LoopOutcome, Planner, ToolLoop, Verdict, DEFAULT_CRITIC_PROMPT};
use crate::tools::{browser_registry, BrowserSession, SharedBrowser, ToolExecutor};
use crate::workflow::types::{OrchestrationState, PlanItem, PlanStatus};

const ACTION_SYSTEM_PROMPT: &str = "You are a browser automation agent working inside one browser tab.\n\
Carry out the current subtask with the available tools. Use read_page to see the page and the numbered \
elements you can click or fill. Do not work ahead on later subtasks.\n\
When the subtask is done (or clearly cannot be done), reply in plain text with what you did and what the \
page now shows.";

/// Subtask 执行器
pub struct ActionExecutor {
    planner: Arc<Planner>,
    browser: SharedBrowser,
    critic: Critic,
    recovery: RecoveryEngine,
    max_steps: usize,
    tools: ToolsSection,
}

impl ActionExecutor {
    pub fn new(planner: Arc<Planner>, browser: SharedBrowser, engine: &EngineSection, tools: &ToolsSection) -> Self {
        Self {
            planner,
            browser,
            critic: Critic::new(DEFAULT_CRITIC_PROMPT, tools.max_page_chars),
            recovery: RecoveryEngine::new(),
            max_steps: engine.max_subtask_steps,
            tools: tools.clone(),
        }
    }

    /// 构造第 i 个 Subtask 的指令：本轮已完成的 Subtask 摘要 + 当前 Subtask 完整说明
    fn instruction(goal: &str, task: Option<&PlanItem>, done: &[(String, String)], subtask: &PlanItem) -> Message {
        let mut text = format!("Overall goal: {}\n", goal);
        if let Some(task) = task {
            text.push_str(&format!("Current task: {}: {}\n", task.label, task.description));
        }
        if !done.is_empty() {
            text.push_str("\nAlready completed in this pass:\n");
            for (label, explanation) in done {
                text.push_str(&format!("- {}: {}\n", label, explanation));
            }
        }
        text.push_str(&format!(
            "\nCurrent subtask ({}): {}\n{}",
            subtask.id, subtask.label, subtask.description
        ));
        Message::user(text)
    }

    /// 执行一个 Subtask 并给出判定；只有取消会作为错误返回
    async fn run_subtask(
        &self,
        executor: &ToolExecutor,
        session: &BrowserSession,
        history: &[Message],
        instruction: Message,
        subtask: &PlanItem,
        cancel: &CancellationToken,
    ) -> Result<(Verdict, Vec<Message>), AgentError> {
        let tool_loop = ToolLoop::new(&self.planner, executor, &self.recovery, cancel.clone())
            .with_max_steps(self.max_steps);

        let result = match run_tool_loop(&tool_loop, ACTION_SYSTEM_PROMPT, history, instruction).await {
            Ok(r) => r,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(subtask_id = %subtask.id, error = %e, "subtask loop failed");
                return Ok((Verdict::failed(format!("Subtask could not run: {}", e)), Vec::new()));
            }
        };

        if let LoopOutcome::StepLimit(_) = result.outcome {
            let verdict = Verdict::failed(format!("Step limit of {} reached before the subtask finished", self.max_steps));
            return Ok((verdict, result.turns));
        }

        let judged = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            v = self.critic.judge(&self.planner, self.browser.as_ref(), &session.tab, &subtask.description, &result.turns) => v,
        };
        let verdict = match judged {
            Ok(v) => v,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => Verdict::failed(format!("Verdict unavailable: {}", e)),
        };
        Ok((verdict, result.turns))
    }

    /// 按顺序执行 state.subtask_plan；遇到失败立即返回（部分更新后的计划留在 state 中）
    pub async fn execute(
        &self,
        goal: &str,
        session: &BrowserSession,
        state: &mut OrchestrationState,
        context: &mut ConversationContext,
        cancel: &CancellationToken,
        feed: &StatusFeed,
    ) -> Result<(), AgentError> {
        let registry = browser_registry(self.browser.clone(), session.tab.clone(), self.tools.max_page_chars);
        let executor = ToolExecutor::new(registry, self.tools.read_timeout_secs, self.tools.action_timeout_secs);
        let task = state.current_task().cloned();
        let mut done: Vec<(String, String)> = Vec::new();

        for i in 0..state.subtask_plan.len() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            state.current_subtask_index = i;
            state.subtask_plan[i].set_status(PlanStatus::InProgress);
            feed.publish_action(state);

            let subtask = state.subtask_plan[i].clone();
            tracing::info!(subtask_id = %subtask.id, label = %subtask.label, "subtask started");
            let instruction = Self::instruction(goal, task.as_ref(), &done, &subtask);
            let (verdict, turns) = self
                .run_subtask(&executor, session, context.messages(), instruction, &subtask, cancel)
                .await?;

            let item = &mut state.subtask_plan[i];
            item.push_result(verdict.explanation.clone());
            if !verdict.is_successful {
                item.set_status(PlanStatus::Failed);
                tracing::warn!(subtask_id = %item.id, explanation = %verdict.explanation, "subtask failed");
                feed.publish_action(state);
                return Ok(());
            }
            item.set_status(PlanStatus::Completed);
            tracing::info!(subtask_id = %item.id, "subtask completed");
            done.push((item.label.clone(), verdict.explanation));

            context.extend(turns);
            let dropped = context.trim();
            if dropped > 0 {
                tracing::debug!(dropped, "context trimmed after subtask");
            }
            feed.publish_action(state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;
    use crate::tools::{Actuator, MockBrowser};

    fn last_user(msgs: &[Message]) -> String {
        msgs.iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn is_verdict_request(msgs: &[Message]) -> bool {
        msgs.first().map(|m| m.content.contains("strict reviewer")).unwrap_or(false)
    }

    fn subtasks(n: usize) -> Vec<PlanItem> {
        (1..=n)
            .map(|i| PlanItem::new(i.to_string(), format!("Step {i}"), format!("do step {i}")))
            .collect()
    }

    async fn setup(
        llm: MockLlmClient,
    ) -> (ActionExecutor, BrowserSession, Arc<MockBrowser>) {
        let browser = Arc::new(MockBrowser::new());
        let tab = browser.create_tab(None).await.unwrap();
        let planner = Arc::new(Planner::new(Arc::new(llm), 0));
        let exec = ActionExecutor::new(planner, browser.clone(), &EngineSection::default(), &ToolsSection::default());
        let session = BrowserSession {
            session_id: "s1".into(),
            tab,
        };
        (exec, session, browser)
    }

    #[tokio::test]
    async fn test_all_subtasks_complete() {
        let llm = MockLlmClient::new(|msgs| {
            if is_verdict_request(msgs) {
                Ok(r#"{"isSuccessful": true, "explanation": "looks done"}"#.to_string())
            } else {
                Ok("Finished the step".to_string())
            }
        });
        let (exec, session, _) = setup(llm).await;
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(3);
        let mut ctx = ConversationContext::new(40);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();

        assert!(state.subtask_plan.iter().all(|s| s.status == PlanStatus::Completed));
        assert!(state.subtask_plan.iter().all(|s| s.results == vec!["looks done".to_string()]));
        // 每个 Subtask：指令 + 最终回复
        assert_eq!(ctx.len(), 6);
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_subtasks() {
        let llm = MockLlmClient::new(|msgs| {
            if is_verdict_request(msgs) {
                let ok = !last_user(msgs).contains("do step 2");
                Ok(format!(r#"{{"isSuccessful": {}, "explanation": "checked"}}"#, ok))
            } else {
                Ok("Tried".to_string())
            }
        });
        let (exec, session, _) = setup(llm).await;
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(3);
        let mut ctx = ConversationContext::new(40);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();

        let statuses: Vec<_> = state.subtask_plan.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![PlanStatus::Completed, PlanStatus::Failed, PlanStatus::Pending]);
        assert_eq!(state.current_subtask_index, 1);
        // 失败 Subtask 的轮次不并入上下文
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn test_later_instruction_summarises_completed_subtasks() {
        let llm = MockLlmClient::new(|msgs| {
            if is_verdict_request(msgs) {
                return Ok(r#"{"isSuccessful": true, "explanation": "opened the shop"}"#.to_string());
            }
            let instruction = last_user(msgs);
            if instruction.contains("do step 2") && !instruction.contains("Step 1: opened the shop") {
                return Ok("missing summary".to_string());
            }
            Ok("ok".to_string())
        });
        let (exec, session, _) = setup(llm).await;
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(2);
        let mut ctx = ConversationContext::new(40);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();
        assert!(ctx.messages().iter().all(|m| m.content != "missing summary"));
    }

    #[tokio::test]
    async fn test_step_limit_is_unsuccessful_verdict() {
        let llm = MockLlmClient::new(|_| Ok(r#"{"tool": "scroll", "args": {"direction": "down"}}"#.to_string()));
        let browser = Arc::new(MockBrowser::new());
        let tab = browser.create_tab(Some("https://a.test/")).await.unwrap();
        let planner = Arc::new(Planner::new(Arc::new(llm), 0));
        let engine = EngineSection {
            max_subtask_steps: 2,
            ..EngineSection::default()
        };
        let exec = ActionExecutor::new(planner, browser, &engine, &ToolsSection::default());
        let session = BrowserSession { session_id: "s".into(), tab };
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(1);
        let mut ctx = ConversationContext::new(40);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();
        assert_eq!(state.subtask_plan[0].status, PlanStatus::Failed);
        assert!(state.subtask_plan[0].results[0].contains("Step limit"));
    }

    /// 页面末尾的标记能否进入判定 prompt 取决于 tools.max_page_chars
    async fn verdict_sees_page_end(max_page_chars: usize) -> bool {
        let llm = MockLlmClient::new(|msgs| {
            if is_verdict_request(msgs) {
                let seen = last_user(msgs).contains("END-OF-ARTICLE");
                Ok(format!(r#"{{"isSuccessful": {}, "explanation": "checked"}}"#, seen))
            } else {
                Ok("Read the article".to_string())
            }
        });
        let long_page = format!("{}END-OF-ARTICLE", "lorem ipsum ".repeat(850));
        let browser = Arc::new(MockBrowser::new().with_page("https://a.test/long", long_page));
        let tab = browser.create_tab(Some("https://a.test/long")).await.unwrap();
        let planner = Arc::new(Planner::new(Arc::new(llm), 0));
        let tools = ToolsSection {
            max_page_chars,
            ..ToolsSection::default()
        };
        let exec = ActionExecutor::new(planner, browser, &EngineSection::default(), &tools);
        let session = BrowserSession { session_id: "s".into(), tab };
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(1);
        let mut ctx = ConversationContext::new(40);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();
        state.subtask_plan[0].status == PlanStatus::Completed
    }

    #[tokio::test]
    async fn test_critic_page_budget_follows_tools_config() {
        assert!(verdict_sees_page_end(12_000).await);
        assert!(!verdict_sees_page_end(2_000).await);
    }

    #[tokio::test]
    async fn test_context_is_trimmed_to_suffix() {
        let llm = MockLlmClient::new(|msgs| {
            if is_verdict_request(msgs) {
                Ok(r#"{"isSuccessful": true, "explanation": "ok"}"#.to_string())
            } else {
                Ok("done".to_string())
            }
        });
        let (exec, session, _) = setup(llm).await;
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(4);
        let mut ctx = ConversationContext::new(3);

        exec.execute("goal", &session, &mut state, &mut ctx, &CancellationToken::new(), &StatusFeed::default())
            .await
            .unwrap();
        assert_eq!(ctx.len(), 3);
        assert!(ctx.messages().last().map(|m| m.content == "done").unwrap_or(false));
    }

    #[tokio::test]
    async fn test_cancelled_execution() {
        let (exec, session, _) = setup(MockLlmClient::default()).await;
        let mut state = OrchestrationState::with_task_plan(subtasks(1));
        state.subtask_plan = subtasks(2);
        let mut ctx = ConversationContext::new(40);
        let token = CancellationToken::new();
        token.cancel();

        let err = exec
            .execute("goal", &session, &mut state, &mut ctx, &token, &StatusFeed::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(state.subtask_plan.iter().all(|s| s.status == PlanStatus::Pending));
    }
}
