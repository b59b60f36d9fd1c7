use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

/// 一次投递尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// 邮箱已满，客户端太慢
    Full,
    /// 邮箱已关闭
    Closed,
}

/// 一个在线连接
///
/// 连接中心只持有非拥有的成员引用；邮箱的关闭是幂等的。
#[derive(Debug)]
pub struct Client {
    id: String,
    user_id: i64,
    subscriptions: RwLock<Vec<String>>,
    mailbox: Mutex<Option<mpsc::Sender<Arc<String>>>>,
    connected_at: DateTime<Utc>,
}

impl Client {
    /// 创建客户端及其邮箱接收端
    pub fn new(user_id: i64, mailbox_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let client = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            subscriptions: RwLock::new(Vec::new()),
            mailbox: Mutex::new(Some(tx)),
            connected_at: Utc::now(),
        };
        (Arc::new(client), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn subscribe(&self, channels: &[String]) {
        let mut subscriptions = self.subscriptions.write();
        for channel in channels {
            if !subscriptions.contains(channel) {
                subscriptions.push(channel.clone());
            }
        }
    }

    pub fn unsubscribe(&self, channels: &[String]) {
        self.subscriptions
            .write()
            .retain(|existing| !channels.contains(existing));
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().iter().any(|c| c == channel)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().clone()
    }

    /// 非阻塞地把一帧放入邮箱
    pub fn try_deliver(&self, frame: Arc<String>) -> Delivery {
        let mailbox = self.mailbox.lock();
        let Some(tx) = mailbox.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// 关闭邮箱，只有第一次调用返回 `true`
    ///
    /// 已排队的消息仍会被发送泵取走，之后发送泵发送关闭帧。
    pub fn close(&self) -> bool {
        self.mailbox.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.lock().is_none()
    }
}
