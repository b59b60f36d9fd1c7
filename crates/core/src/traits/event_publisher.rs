use async_trait::async_trait;

use crate::models::Event;

/// 事件发布接口
///
/// 任务管理器依赖此接口发布生命周期事件。发布是尽力而为的，不返回错误。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event);
}

/// 丢弃所有事件的发布器
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: Event) {}
}
