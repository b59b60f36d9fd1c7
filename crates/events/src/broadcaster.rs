//! 事件广播器
//!
//! 发布时先打上时间戳，然后：
//! 1. 按分类路由到连接中心（频道、用户或全体）
//! 2. 通知该事件类型的本地订阅者，每个监听器在独立任务中运行
//!
//! | 分类 | 连接中心调用 |
//! |---|---|
//! | task | `task_progress` 事件走 `task_progress` 频道，其余走 `task_status` |
//! | factor | `factor_test` 频道 |
//! | model | `model_training` 频道 |
//! | strategy | `strategy_backtest` 频道 |
//! | workflow | `workflow_progress` 频道 |
//! | system | `system_status` 事件走 `system_status` 频道，其余走 `system_monitor` |
//! | notification | 有用户则发给该用户，否则走 `notifications` 频道 |
//! | 其他 | 有用户则发给该用户，否则广播给全体 |
//!
//! 频道路由的事件带有用户时，只投递给该用户名下订阅了频道的连接。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashboard_core::models::event_types;
use dashboard_core::{Event, EventCategory, EventPublisher, TaskStatus};
use dashboard_hub::{channels, Hub, ServerMessage};
use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::subscriber::Subscriber;

/// 事件在连接中心的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubRoute {
    Channel(&'static str),
    /// 频道订阅者中属于该用户的连接
    UserChannel(&'static str, i64),
    User(i64),
    All,
}

/// 计算事件的路由
pub fn route(event: &Event) -> HubRoute {
    let scoped_or = |fallback: HubRoute| {
        if event.user_id != 0 {
            HubRoute::User(event.user_id)
        } else {
            fallback
        }
    };
    let channel = |name: &'static str| match event.user_id {
        0 => HubRoute::Channel(name),
        user_id => HubRoute::UserChannel(name, user_id),
    };

    match &event.category {
        EventCategory::Task if event.event_type == event_types::TASK_PROGRESS => {
            channel(channels::TASK_PROGRESS)
        }
        EventCategory::Task => channel(channels::TASK_STATUS),
        EventCategory::Factor => channel(channels::FACTOR_TEST),
        EventCategory::Model => channel(channels::MODEL_TRAINING),
        EventCategory::Strategy => channel(channels::STRATEGY_BACKTEST),
        EventCategory::Workflow => channel(channels::WORKFLOW_PROGRESS),
        EventCategory::System if event.event_type == event_types::SYSTEM_STATUS => {
            channel(channels::SYSTEM_STATUS)
        }
        EventCategory::System => channel(channels::SYSTEM_MONITOR),
        EventCategory::Notification => scoped_or(HubRoute::Channel(channels::NOTIFICATIONS)),
        EventCategory::Other(_) => scoped_or(HubRoute::All),
    }
}

/// 进程内事件广播器
pub struct EventBroadcaster {
    hub: Arc<Hub>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl EventBroadcaster {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// 注册订阅者，返回订阅者ID
    pub async fn subscribe(&self, event_type: &str, subscriber: Subscriber) -> String {
        let id = subscriber.id.clone();
        self.subscribers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(subscriber);
        debug!(event_type, subscriber_id = %id, "subscriber registered");
        id
    }

    /// 移除订阅者，返回是否存在
    pub async fn unsubscribe(&self, event_type: &str, subscriber_id: &str) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(list) = subscribers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != subscriber_id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(event_type);
        }
        removed
    }

    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// 发布事件
    pub async fn publish(&self, mut event: Event) {
        event.timestamp = Utc::now();
        counter!("events_published_total", "category" => event.category.to_string())
            .increment(1);

        self.route_to_hub(&event).await;
        self.notify_subscribers(&event).await;
    }

    async fn route_to_hub(&self, event: &Event) {
        if let Some(field) = event.category.id_field() {
            match event.entity_id() {
                Some(id) => debug!(
                    event_type = %event.event_type,
                    category = %event.category,
                    entity_id = %id,
                    "routing event"
                ),
                None => warn!(
                    event_type = %event.event_type,
                    category = %event.category,
                    field,
                    "event payload missing entity id"
                ),
            }
        }

        let route = route(event);
        let channel = match route {
            HubRoute::Channel(channel) | HubRoute::UserChannel(channel, _) => channel,
            HubRoute::User(_) | HubRoute::All => "",
        };
        let message = ServerMessage {
            message_type: event.event_type.clone(),
            channel: channel.to_string(),
            data: Value::Object(event.payload.clone()),
            timestamp: event.timestamp,
            user_id: (event.user_id != 0).then_some(event.user_id),
        };

        let delivered = match route {
            HubRoute::Channel(channel) => self.hub.broadcast_to_channel(channel, &message).await,
            HubRoute::UserChannel(channel, user_id) => {
                self.hub
                    .broadcast_to_channel_for_user(channel, user_id, &message)
                    .await
            }
            HubRoute::User(user_id) => self.hub.send_to_user(user_id, &message).await,
            HubRoute::All => self.hub.broadcast_to_all(&message).await,
        };
        debug!(event_type = %event.event_type, ?route, delivered, "event pushed to hub");
    }

    async fn notify_subscribers(&self, event: &Event) {
        let matching: Vec<Subscriber> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&event.event_type) {
                Some(list) => list.iter().filter(|s| s.accepts(event)).cloned().collect(),
                None => return,
            }
        };

        for subscriber in matching {
            let event = event.clone();
            tokio::spawn(async move {
                let event_type = event.event_type.clone();
                if let Err(e) = subscriber.listener.on_event(event).await {
                    warn!(
                        subscriber_id = %subscriber.id,
                        event_type = %event_type,
                        error = %e,
                        "event listener failed"
                    );
                }
            });
        }
    }

    pub async fn emit_task_progress(&self, user_id: i64, task_id: i64, progress: u8) {
        self.publish(Event::task_progress(user_id, task_id, progress))
            .await;
    }

    pub async fn emit_task_status(
        &self,
        user_id: i64,
        task_id: i64,
        status: TaskStatus,
        error: Option<&str>,
    ) {
        self.publish(Event::task_status(user_id, task_id, status, error))
            .await;
    }

    pub async fn emit_task_completed(&self, user_id: i64, task_id: i64, result: &Value) {
        self.publish(Event::task_completed(user_id, task_id, result))
            .await;
    }

    pub async fn emit_system_alert(&self, level: &str, message: &str) {
        self.publish(Event::system_alert(level, message)).await;
    }

    pub async fn emit_system_status(&self, status: Map<String, Value>) {
        self.publish(Event::system_status(status)).await;
    }

    pub async fn emit_notification(&self, user_id: i64, title: &str, message: &str) {
        self.publish(Event::notification(user_id, title, message))
            .await;
    }
}

#[async_trait]
impl EventPublisher for EventBroadcaster {
    async fn publish(&self, event: Event) {
        EventBroadcaster::publish(self, event).await;
    }
}
