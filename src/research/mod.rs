//! 研究流水线：搜索规划 -> 并行 Page Worker -> fan-in 汇总报告

pub mod coordinator;
pub mod page_worker;
pub mod search_planner;
pub mod synthesizer;
pub mod types;

pub use coordinator::Coordinator;
pub use page_worker::PageWorker;
pub use search_planner::plan_search;
pub use synthesizer::synthesize;
pub use types::{PageSummary, ResearchState, ResearchStatus, SearchResult};
