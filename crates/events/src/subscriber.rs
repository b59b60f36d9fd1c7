use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashboard_core::{DashboardResult, Event};

/// 本地事件监听器
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: Event) -> DashboardResult<()>;
}

/// 把异步闭包包装成监听器
pub struct FnListener<F>(pub F);

#[async_trait]
impl<F, Fut> EventListener for FnListener<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = DashboardResult<()>> + Send,
{
    async fn on_event(&self, event: Event) -> DashboardResult<()> {
        (self.0)(event).await
    }
}

/// 按事件类型注册的本地订阅者
///
/// `user_id` 为 0 时接收所有用户的事件，否则只接收该用户的事件。
#[derive(Clone)]
pub struct Subscriber {
    pub id: String,
    pub user_id: i64,
    pub listener: Arc<dyn EventListener>,
}

impl Subscriber {
    pub fn new(user_id: i64, listener: Arc<dyn EventListener>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            listener,
        }
    }

    pub fn from_fn<F, Fut>(user_id: i64, f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DashboardResult<()>> + Send + 'static,
    {
        Self::new(user_id, Arc::new(FnListener(f)))
    }

    pub fn accepts(&self, event: &Event) -> bool {
        self.user_id == 0 || self.user_id == event.user_id
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish()
    }
}
