//! Worker 池：限制并行 Page Worker 数量
//!
//! 每个 Worker 执行前需取得 Semaphore 许可；搜索结果再多，同时打开的标签页数也不超过上限。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 有界 Worker 池
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 获取执行许可；池被关闭时视为取消
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Cancelled)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}
