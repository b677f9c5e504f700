//! fan-out / fan-in 协调
//!
//! 每个搜索结果派生一个 Page Worker（JoinSet），并发宽度受 WorkerPool 限制。Worker 之间不通信，
//! 只把各自的 PageSummary 交回协调者；协调者每收到一个就合并、推送快照并检查 fan-in 闸门。
//! Worker panic 被捕获并记为不可访问，保证每个 URL 都有且只有一条结果。每个 Worker 持有请求 token 的子 token。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, StatusFeed, WorkerPool};
use crate::research::page_worker::PageWorker;
use crate::research::types::{PageSummary, ResearchState};

/// 协调者
pub struct Coordinator {
    worker: Arc<PageWorker>,
    pool: WorkerPool,
}

impl Coordinator {
    pub fn new(worker: Arc<PageWorker>, pool: WorkerPool) -> Self {
        Self { worker, pool }
    }

    /// 为 state.search_results 中每一项运行一个 Worker，全部回报后返回
    pub async fn fan_out(
        &self,
        goal: &str,
        state: &mut ResearchState,
        feed: &StatusFeed,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let mut set: JoinSet<(String, Result<PageSummary, AgentError>)> = JoinSet::new();
        tracing::info!(
            workers = state.search_results.len(),
            max_concurrent = self.pool.capacity(),
            "fanning out page workers"
        );

        for target in state.search_results.iter().cloned() {
            let worker = Arc::clone(&self.worker);
            let pool = self.pool.clone();
            let goal = goal.to_string();
            let cancel = cancel.child_token();
            set.spawn(async move {
                let url = target.url.clone();
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return (url, Err(AgentError::Cancelled)),
                    p = pool.acquire() => match p {
                        Ok(p) => p,
                        Err(e) => return (url, Err(e)),
                    },
                };
                let run = AssertUnwindSafe(worker.run(&goal, &target, &cancel)).catch_unwind().await;
                match run {
                    Ok(result) => (url, result),
                    Err(_) => {
                        tracing::error!(url = %url, "page worker panicked");
                        let summary = PageSummary::inaccessible(&url, "worker crashed");
                        (url, Ok(summary))
                    }
                }
            });
        }

        // 以 URL 计数跟踪尚未回报的 Worker
        let mut outstanding: HashMap<String, usize> = HashMap::new();
        for r in &state.search_results {
            *outstanding.entry(r.url.clone()).or_default() += 1;
        }

        while let Some(joined) = set.join_next().await {
            let (url, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "page worker task failed to join");
                    continue;
                }
            };
            let summary = match result {
                Ok(summary) => summary,
                Err(AgentError::Cancelled) => continue,
                Err(e) => PageSummary::inaccessible(&url, e.to_string()),
            };
            if let Some(n) = outstanding.get_mut(&url) {
                *n = n.saturating_sub(1);
            }
            state.merge(summary);
            feed.publish_research(state);
            tracing::debug!(
                processed = state.processed_urls.len(),
                total = state.search_results.len(),
                "page summary merged"
            );
            if state.ready_for_synthesis() {
                tracing::info!(processed = state.processed_urls.len(), "fan-in gate open");
            }
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        // 无法 join 的 Worker 也要计入，否则闸门永远不开
        let missing: usize = outstanding.values().sum();
        if missing > 0 {
            for (url, n) in outstanding {
                for _ in 0..n {
                    state.merge(PageSummary::inaccessible(&url, "worker did not report"));
                }
            }
            tracing::warn!(missing, ready = state.ready_for_synthesis(), "unreported workers counted as inaccessible");
            feed.publish_research(state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResearchSection, ToolsSection};
    use crate::llm::MockLlmClient;
    use crate::memory::{Message, Role};
    use crate::react::Planner;
    use crate::research::types::SearchResult;
    use crate::tools::MockBrowser;
    use std::collections::BTreeSet;

    fn results(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| SearchResult {
                url: format!("https://s{}.test/", i),
                title: format!("Source {}", i),
            })
            .collect()
    }

    /// 按指令中的 URL 回复摘要，并发下也稳定
    fn summarising_llm() -> MockLlmClient {
        MockLlmClient::new(|msgs: &[Message]| {
            let instruction = msgs
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let url = instruction.split('(').nth(1).unwrap_or("").trim_end_matches(')').to_string();
            Ok(format!(r#"{{"status": "ok", "summary": "facts from {}"}}"#, url))
        })
    }

    fn coordinator(llm: MockLlmClient, browser: Arc<MockBrowser>, max_concurrent: usize) -> Coordinator {
        let planner = Arc::new(Planner::new(Arc::new(llm), 0));
        let worker = PageWorker::new(planner, browser, &ResearchSection::default(), &ToolsSection::default());
        Coordinator::new(Arc::new(worker), WorkerPool::new(max_concurrent))
    }

    #[tokio::test]
    async fn test_every_result_is_processed_once() {
        let browser = Arc::new(MockBrowser::new());
        let coord = coordinator(summarising_llm(), browser.clone(), 2);
        let mut state = ResearchState::new(results(6));

        coord
            .fan_out("goal", &mut state, &StatusFeed::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.processed_urls.len(), 6);
        assert!(state.ready_for_synthesis());
        let urls: BTreeSet<_> = state.processed_urls.iter().cloned().collect();
        let expected: BTreeSet<_> = results(6).into_iter().map(|r| r.url).collect();
        assert_eq!(urls, expected);
        assert_eq!(browser.tabs_created(), 6);
        assert_eq!(browser.tabs_closed().len(), 6);
        for s in &state.page_summaries {
            assert_eq!(s.summary, format!("facts from {}", s.url));
        }
    }

    #[tokio::test]
    async fn test_each_worker_uses_its_own_tab() {
        let browser = Arc::new(MockBrowser::new());
        let coord = coordinator(summarising_llm(), browser.clone(), 3);
        let mut state = ResearchState::new(results(3));
        coord
            .fan_out("goal", &mut state, &StatusFeed::default(), &CancellationToken::new())
            .await
            .unwrap();

        let navigations: Vec<String> = browser.calls().into_iter().filter(|c| c.starts_with("navigate")).collect();
        let tabs: BTreeSet<_> = navigations.iter().filter_map(|c| c.split(' ').nth(1).map(String::from)).collect();
        assert_eq!(navigations.len(), 3);
        assert_eq!(tabs.len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_worker_still_counts() {
        let llm = MockLlmClient::new(|msgs: &[Message]| {
            if msgs.iter().any(|m| m.content.contains("https://s1.test/")) {
                panic!("boom");
            }
            Ok(r#"{"status": "ok", "summary": "fine"}"#.to_string())
        });
        let browser = Arc::new(MockBrowser::new());
        let coord = coordinator(llm, browser.clone(), 2);
        let mut state = ResearchState::new(results(3));

        coord
            .fan_out("goal", &mut state, &StatusFeed::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.processed_urls.len(), 3);
        let crashed = state.page_summaries.iter().find(|s| s.url == "https://s1.test/").unwrap();
        assert!(!crashed.accessible);
        assert!(crashed.summary.ends_with("worker crashed"));
        assert_eq!(browser.tabs_created(), 3);
        assert_eq!(browser.tabs_closed().len(), browser.tabs_created());
    }

    #[tokio::test]
    async fn test_cancelled_fan_out() {
        let browser = Arc::new(MockBrowser::new());
        let coord = coordinator(summarising_llm(), browser, 2);
        let mut state = ResearchState::new(results(4));
        let token = CancellationToken::new();
        token.cancel();

        let err = coord
            .fan_out("goal", &mut state, &StatusFeed::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(!state.ready_for_synthesis());
    }
}
