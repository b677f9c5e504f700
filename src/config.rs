//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub research: ResearchSection,
    pub tools: ToolsSection,
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次 LLM 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 结构化输出解析失败后的重试次数
    pub structured_retries: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
            structured_retries: 2,
        }
    }
}

/// [engine] 段：Action 流水线的上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 运行中对话上下文保留的最大轮数（超出后只保留最近部分）
    pub max_context_turns: usize,
    /// 单个 Subtask 工具循环的最大步数
    pub max_subtask_steps: usize,
    /// 单个 Task 允许的重规划次数
    pub max_replans_per_task: usize,
    pub min_tasks: usize,
    pub max_tasks: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_context_turns: 40,
            max_subtask_steps: 20,
            max_replans_per_task: 3,
            min_tasks: 3,
            max_tasks: 10,
        }
    }
}

/// [research] 段：搜索结果数量、Worker 并发与步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    pub min_results: usize,
    pub max_results: usize,
    /// 同时运行的 Page Worker 上限
    pub max_concurrent_workers: usize,
    /// 单个 Page Worker 的推理/工具往返上限
    pub max_worker_steps: usize,
    /// 验证/同意弹窗的最大重试次数（写入 Worker 提示词）
    pub max_challenge_retries: usize,
    pub max_summary_chars: usize,
    /// 搜索入口，{query} 替换为 URL 编码后的目标
    pub search_url: String,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            min_results: 5,
            max_results: 10,
            max_concurrent_workers: 4,
            max_worker_steps: 12,
            max_challenge_retries: 2,
            max_summary_chars: 4000,
            search_url: "https://html.duckduckgo.com/html/?q={query}".to_string(),
        }
    }
}

/// [tools] 段：读取类 / 操作类工具超时、页面快照截断长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// read_page 等元数据读取的超时（秒）
    pub read_timeout_secs: u64,
    /// navigate / click 等改变页面的操作超时（秒）
    pub action_timeout_secs: u64,
    pub max_page_chars: usize,
    pub user_agent: String,
    /// 浏览器实现：http / chrome（需 feature "browser"）/ mock
    pub driver: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            read_timeout_secs: 10,
            action_timeout_secs: 30,
            max_page_chars: 12_000,
            user_agent: "Mozilla/5.0 (compatible; bee-pilot/0.1)".to_string(),
            driver: "http".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
