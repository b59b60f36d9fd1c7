//! 任务处理器接口定义
//!
//! 处理器是领域计算（模型训练、回测、因子检验等）的不透明入口。
//! 任务管理器在worker中调用处理器，并传入：
//! - [`ExecutionScope`]：取消令牌和暂停闸门
//! - [`ProgressSink`]：非阻塞的进度汇报端
//!
//! 处理器必须在步骤之间调用 [`ExecutionScope::checkpoint`]，
//! 并且不得在返回后继续持有进度汇报端。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::errors::{DashboardError, DashboardResult};
use crate::models::{Task, TaskType};
pub use crate::progress::ProgressSink;

/// 处理器执行范围
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
}

impl ExecutionScope {
    pub fn new(cancel: CancellationToken, pause: watch::Receiver<bool>) -> Self {
        Self { cancel, pause }
    }

    /// 不受任何任务管理器控制的执行范围
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(CancellationToken::new(), rx)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 协作检查点
    ///
    /// 已取消时返回 `Cancelled`；暂停时等待恢复或取消。
    pub async fn checkpoint(&self) -> DashboardResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DashboardError::Cancelled);
        }
        let mut pause = self.pause.clone();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DashboardError::Cancelled),
            // 发送端已释放时不再阻塞
            _ = pause.wait_for(|paused| !*paused) => Ok(()),
        }
    }

    /// 可被取消打断的等待
    pub async fn sleep(&self, duration: Duration) -> DashboardResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DashboardError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// 任务处理器接口
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 处理器负责的任务类型
    fn task_type(&self) -> TaskType;

    /// 执行任务，返回写入任务 `result` 字段的JSON结果
    async fn handle(
        &self,
        scope: ExecutionScope,
        task: &Task,
        progress: ProgressSink,
    ) -> DashboardResult<Value>;
}
