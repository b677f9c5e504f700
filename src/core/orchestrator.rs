//! 引擎编排器：主控流程
//!
//! [`Engine::run`] 处理一次顶层请求：Router 分类后进入行动流水线（Task Executor 与 Action Executor 交替）
//! 或研究流水线（搜索 -> 并行 Worker -> 汇总）。每次状态变化都推送到 StatusFeed。
//!
//! [`create_engine`] 加载配置、创建 LLM 与浏览器，在后台任务中消费 Submit / Cancel / Quit 命令。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{load_config, AppConfig};
use crate::core::{AgentError, SessionSupervisor, StatusFeed, StatusSnapshot, WorkerPool};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{ConversationContext, Message};
use crate::react::Planner;
use crate::research::{plan_search, synthesize, Coordinator, PageWorker, ResearchState};
use crate::tools::{BrowserSession, HttpBrowser, MockBrowser, SharedBrowser};
use crate::workflow::{
    advance, classify, decompose, install_subtasks, plan_tasks, ActionExecutor, Mode, OrchestrationState, PlanItem,
    PlanStatus, TaskStep,
};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// 行动流水线结果
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub task_plan: Vec<PlanItem>,
    /// 所有 Task 均已完成
    pub completed: bool,
    pub summary: String,
}

/// 研究流水线结果
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub report: String,
    pub state: ResearchState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EngineOutcome {
    Action(ActionOutcome),
    Research(ResearchOutcome),
}

impl EngineOutcome {
    /// 面向用户的最终文本
    pub fn text(&self) -> &str {
        match self {
            EngineOutcome::Action(a) => &a.summary,
            EngineOutcome::Research(r) => &r.report,
        }
    }
}

/// 在取消令牌与 future 之间竞争
async fn or_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        r = fut => r,
    }
}

fn action_summary(state: &OrchestrationState, completed: bool) -> String {
    let done = state.task_plan.iter().filter(|t| t.is_completed()).count();
    let mut out = if completed {
        format!("All {} tasks completed.", state.task_plan.len())
    } else {
        format!("Stopped after completing {} of {} tasks.", done, state.task_plan.len())
    };
    for t in &state.task_plan {
        let mark = match t.status {
            PlanStatus::Completed => "x",
            PlanStatus::Failed => "!",
            PlanStatus::InProgress => "~",
            PlanStatus::Pending => " ",
        };
        out.push_str(&format!("\n[{}] {}. {}", mark, t.id, t.label));
        if let Some(note) = t.last_result() {
            out.push_str(&format!(": {}", note));
        }
    }
    out
}

/// 编排引擎
pub struct Engine {
    planner: Arc<Planner>,
    browser: SharedBrowser,
    config: AppConfig,
    feed: StatusFeed,
}

impl Engine {
    pub fn new(llm: Arc<dyn LlmClient>, browser: SharedBrowser, config: AppConfig) -> Self {
        let planner = Arc::new(Planner::new(llm, config.llm.structured_retries));
        Self {
            planner,
            browser,
            config,
            feed: StatusFeed::default(),
        }
    }

    /// 使用外部提供的状态推送端
    pub fn with_feed(mut self, feed: StatusFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn feed(&self) -> &StatusFeed {
        &self.feed
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.feed.subscribe()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 处理一次顶层请求；forced_mode 为 None 时由 Router 分类
    ///
    /// 任何错误返回前都会推送 `StatusSnapshot::Failed`。
    pub async fn run(
        &self,
        goal: &str,
        history: &[Message],
        forced_mode: Option<Mode>,
        supervisor: &SessionSupervisor,
    ) -> Result<EngineOutcome, AgentError> {
        let result = self.dispatch(goal, history, forced_mode, supervisor).await;

        let (prompt, completion, total) = self.planner.token_usage();
        tracing::info!(prompt, completion, total, "token usage");
        if let Err(e) = &result {
            if e.is_terminal() {
                tracing::warn!(session_id = %supervisor.session_id(), error = %e, "request failed");
            } else {
                tracing::error!(session_id = %supervisor.session_id(), error = %e, "unexpected error left the pipeline");
            }
            self.feed.publish(StatusSnapshot::Failed { error: e.to_string() });
        }
        result
    }

    async fn dispatch(
        &self,
        goal: &str,
        history: &[Message],
        forced_mode: Option<Mode>,
        supervisor: &SessionSupervisor,
    ) -> Result<EngineOutcome, AgentError> {
        let cancel = supervisor.cancel_token();
        let mode = match forced_mode {
            Some(m) => m,
            None => or_cancel(&cancel, classify(&self.planner, goal, history)).await?,
        };
        tracing::info!(session_id = %supervisor.session_id(), mode = ?mode, "request started");

        match mode {
            Mode::Action => self.run_action(goal, history, supervisor).await.map(EngineOutcome::Action),
            Mode::Research => self.run_research(goal, &cancel).await.map(EngineOutcome::Research),
        }
    }

    async fn run_action(
        &self,
        goal: &str,
        history: &[Message],
        supervisor: &SessionSupervisor,
    ) -> Result<ActionOutcome, AgentError> {
        let cancel = supervisor.cancel_token();
        let engine_cfg = &self.config.engine;
        let mut state = or_cancel(&cancel, plan_tasks(&self.planner, engine_cfg, goal, history)).await?;
        self.feed.publish_action(&state);

        let tab = self
            .browser
            .create_tab(None)
            .await
            .map_err(|e| AgentError::Config(format!("browser unavailable: {}", e)))?;
        let session = BrowserSession {
            session_id: supervisor.session_id().to_string(),
            tab,
        };

        let result = self.drive_tasks(goal, history, &session, &mut state, &cancel).await;

        let closed = self.browser.close_tab(&session.tab).await;
        if !closed.success {
            tracing::debug!(tab = %session.tab, detail = %closed.detail, "action tab close failed");
        }
        let completed = result?;
        self.feed.publish_action(&state);
        Ok(ActionOutcome {
            summary: action_summary(&state, completed),
            task_plan: state.task_plan,
            completed,
        })
    }

    /// Task Executor 与 Action Executor 交替，直到状态机终止
    async fn drive_tasks(
        &self,
        goal: &str,
        history: &[Message],
        session: &BrowserSession,
        state: &mut OrchestrationState,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        let engine_cfg = &self.config.engine;
        let executor = ActionExecutor::new(self.planner.clone(), self.browser.clone(), engine_cfg, &self.config.tools);
        let mut context = ConversationContext::with_history(engine_cfg.max_context_turns, history.to_vec());
        context.push(Message::user(format!("Goal: {}", goal)));

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let request = match advance(state, engine_cfg.max_replans_per_task) {
                TaskStep::Terminated { completed } => {
                    tracing::info!(completed, "action workflow terminated");
                    self.feed.publish_action(state);
                    return Ok(completed);
                }
                TaskStep::Decompose(request) => request,
            };
            self.feed.publish_action(state);

            let plan = or_cancel(cancel, decompose(&self.planner, goal, &request, context.messages())).await?;
            install_subtasks(state, plan);
            self.feed.publish_action(state);

            executor.execute(goal, session, state, &mut context, cancel, &self.feed).await?;
        }
    }

    async fn run_research(&self, goal: &str, cancel: &CancellationToken) -> Result<ResearchOutcome, AgentError> {
        let research_cfg = &self.config.research;
        let results = plan_search(&self.planner, &self.browser, research_cfg, &self.config.tools, goal, cancel).await?;

        let mut state = ResearchState::new(results);
        self.feed.publish_research(&state);

        let worker = PageWorker::new(self.planner.clone(), self.browser.clone(), research_cfg, &self.config.tools);
        let coordinator = Coordinator::new(Arc::new(worker), WorkerPool::new(research_cfg.max_concurrent_workers));
        coordinator.fan_out(goal, &mut state, &self.feed, cancel).await?;

        or_cancel(cancel, synthesize(&self.planner, goal, &mut state)).await?;
        self.feed.publish_research(&state);
        Ok(ResearchOutcome {
            report: state.final_report.clone(),
            state,
        })
    }
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / DeepSeek / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;
    match provider.as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Arc::new(MockLlmClient::default())
        }
        "deepseek" => match std::env::var("DEEPSEEK_API_KEY") {
            Ok(key) => {
                let base = cfg.llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
                tracing::info!(model = %cfg.llm.model, "Using DeepSeek LLM");
                Arc::new(OpenAiClient::new(Some(base), &cfg.llm.model, Some(&key), timeout))
            }
            Err(_) => {
                tracing::warn!("DEEPSEEK_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient::default())
            }
        },
        _ => match std::env::var("OPENAI_API_KEY") {
            Ok(key) => {
                tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
                Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key), timeout))
            }
            Err(_) => {
                tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient::default())
            }
        },
    }
}

/// 根据 [tools].driver 创建浏览器实现
pub fn create_browser_from_config(cfg: &AppConfig) -> Result<SharedBrowser, AgentError> {
    match cfg.tools.driver.to_lowercase().as_str() {
        "mock" => Ok(Arc::new(MockBrowser::new())),
        #[cfg(feature = "browser")]
        "chrome" => Ok(Arc::new(crate::tools::browser::ChromeBrowser::new(cfg.tools.max_page_chars))),
        #[cfg(not(feature = "browser"))]
        "chrome" => Err(AgentError::Config(
            "driver \"chrome\" requires building with --features browser".to_string(),
        )),
        "http" => Ok(Arc::new(HttpBrowser::new(&cfg.tools).map_err(AgentError::Config)?)),
        other => Err(AgentError::Config(format!("unknown browser driver: {}", other))),
    }
}

/// 从前端发往引擎的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交一个目标；mode 为 None 时由 Router 决定
    Submit { goal: String, mode: Option<Mode> },
    /// 取消当前请求
    Cancel,
    /// 退出
    Quit,
}

/// 一次请求的结果报告
#[derive(Debug)]
pub struct RunReport {
    pub session_id: String,
    pub goal: String,
    pub result: Result<EngineOutcome, AgentError>,
}

/// 创建引擎运行时：返回命令发送端、状态接收端、结果接收端；后台任务消费命令
pub async fn create_engine(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(
    mpsc::UnboundedSender<Command>,
    watch::Receiver<StatusSnapshot>,
    mpsc::UnboundedReceiver<RunReport>,
)> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let llm = create_llm_from_config(&cfg);
    let browser = create_browser_from_config(&cfg)?;
    Ok(spawn_engine(Engine::new(llm, browser, cfg)))
}

/// 把一次成功请求写入跨请求历史
fn record_exchange(history: &mut ConversationContext, goal: &str, answer: &str) {
    history.push(Message::user(goal));
    history.push(Message::assistant(answer));
    history.trim();
}

/// 在后台任务中运行引擎命令循环
pub fn spawn_engine(
    engine: Engine,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<StatusSnapshot>,
    mpsc::UnboundedReceiver<RunReport>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (report_tx, report_rx) = mpsc::unbounded_channel::<RunReport>();
    let status_rx = engine.subscribe();
    let engine = Arc::new(engine);
    // 跨请求保留的对话：每次请求的目标与最终文本
    let max_turns = engine.config().engine.max_context_turns;
    let history = Arc::new(Mutex::new(ConversationContext::new(max_turns)));

    tokio::spawn(async move {
        let mut current: Option<(SessionSupervisor, tokio::task::JoinHandle<()>)> = None;

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit { goal, mode } => {
                    if let Some((_, handle)) = &current {
                        if !handle.is_finished() {
                            tracing::warn!(goal = %goal, "engine busy, request rejected");
                            continue;
                        }
                    }
                    let supervisor = SessionSupervisor::new();
                    let run_supervisor = supervisor.clone();
                    let engine = Arc::clone(&engine);
                    let history = Arc::clone(&history);
                    let report_tx = report_tx.clone();
                    let handle = tokio::spawn(async move {
                        let prior = history.lock().await.messages().to_vec();
                        let result = engine.run(&goal, &prior, mode, &run_supervisor).await;
                        if let Ok(outcome) = &result {
                            record_exchange(&mut *history.lock().await, &goal, outcome.text());
                        }
                        let _ = report_tx.send(RunReport {
                            session_id: run_supervisor.session_id().to_string(),
                            goal,
                            result,
                        });
                    });
                    current = Some((supervisor, handle));
                }
                Command::Cancel => {
                    if let Some((supervisor, _)) = &current {
                        tracing::info!(session_id = %supervisor.session_id(), "cancelling request");
                        supervisor.cancel();
                    }
                }
                Command::Quit => {
                    if let Some((supervisor, handle)) = current.take() {
                        supervisor.cancel();
                        let _ = handle.await;
                    }
                    break;
                }
            }
        }
    });

    (cmd_tx, status_rx, report_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_summary_marks_statuses() {
        let mut state = OrchestrationState::with_task_plan(vec![
            PlanItem::new("1", "Open", "open"),
            PlanItem::new("2", "Buy", "buy"),
        ]);
        state.task_plan[0].status = PlanStatus::Completed;
        state.task_plan[0].push_result("done");
        state.task_plan[1].status = PlanStatus::Failed;

        let text = action_summary(&state, false);
        assert!(text.starts_with("Stopped after completing 1 of 2 tasks."));
        assert!(text.contains("[x] 1. Open: done"));
        assert!(text.contains("[!] 2. Buy"));
    }

    #[test]
    fn test_mock_provider_and_driver() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.tools.driver = "mock".into();
        let _llm = create_llm_from_config(&cfg);
        assert!(create_browser_from_config(&cfg).is_ok());

        cfg.tools.driver = "netscape".into();
        assert!(matches!(create_browser_from_config(&cfg), Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let engine = Engine::new(
            Arc::new(MockLlmClient::default()),
            Arc::new(MockBrowser::new()),
            AppConfig::default(),
        );
        let supervisor = SessionSupervisor::new();
        supervisor.cancel();
        let err = engine.run("goal", &[], None, &supervisor).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(matches!(engine.feed().current(), StatusSnapshot::Failed { .. }));
    }

    #[tokio::test]
    async fn test_classification_failure_reaches_status_feed() {
        let engine = Engine::new(
            Arc::new(MockLlmClient::new(|_| Ok("no idea".to_string()))),
            Arc::new(MockBrowser::new()),
            AppConfig::default(),
        );
        let mut rx = engine.subscribe();

        let err = engine.run("goal", &[], None, &SessionSupervisor::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ClassificationFailed(_)));
        assert!(rx.has_changed().unwrap());
        match &*rx.borrow_and_update() {
            StatusSnapshot::Failed { error } => assert!(error.starts_with("Classification failed")),
            other => panic!("unexpected snapshot: {:?}", other),
        };
    }

    #[test]
    fn test_recorded_history_is_trimmed_to_recent_turns() {
        let mut history = ConversationContext::new(3);
        record_exchange(&mut history, "first", "one");
        record_exchange(&mut history, "second", "two");

        let contents: Vec<&str> = history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "second", "two"]);
    }
}
