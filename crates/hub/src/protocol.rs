//! JSON文本帧协议
//!
//! 服务端 → 客户端：`{type, channel, data, timestamp, user_id?}`
//!
//! 客户端 → 服务端：`{action: "subscribe" | "unsubscribe" | "ping", channels: [..]}`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashboard_core::{DashboardError, DashboardResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::Client;

/// 订阅频道
pub mod channels {
    pub const TASK_PROGRESS: &str = "task_progress";
    pub const TASK_STATUS: &str = "task_status";
    pub const FACTOR_TEST: &str = "factor_test";
    pub const MODEL_TRAINING: &str = "model_training";
    pub const STRATEGY_BACKTEST: &str = "strategy_backtest";
    pub const WORKFLOW_PROGRESS: &str = "workflow_progress";
    pub const SYSTEM_MONITOR: &str = "system_monitor";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const SYSTEM_STATUS: &str = "system_status";
    pub const TASK_LOGS: &str = "task_logs";

    pub const ALL: [&str; 10] = [
        TASK_PROGRESS,
        TASK_STATUS,
        FACTOR_TEST,
        MODEL_TRAINING,
        STRATEGY_BACKTEST,
        WORKFLOW_PROGRESS,
        SYSTEM_MONITOR,
        NOTIFICATIONS,
        SYSTEM_STATUS,
        TASK_LOGS,
    ];
}

/// 服务端应答类型
pub mod message_types {
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// 服务端下发的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl ServerMessage {
    pub fn new(message_type: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            channel: channel.into(),
            data,
            timestamp: Utc::now(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            message_types::ERROR,
            "",
            json!({ "message": message.into() }),
        )
    }

    /// 序列化为可在多个邮箱间共享的文本帧
    pub fn to_frame(&self) -> DashboardResult<Arc<String>> {
        serde_json::to_string(self)
            .map(Arc::new)
            .map_err(DashboardError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// 客户端控制消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientControl {
    pub action: ControlAction,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// 处理一条入站文本帧，返回需要回写给该客户端的应答
pub fn handle_control(client: &Client, text: &str) -> ServerMessage {
    let control: ClientControl = match serde_json::from_str(text) {
        Ok(control) => control,
        Err(e) => return ServerMessage::error(format!("invalid message: {e}")),
    };

    match control.action {
        ControlAction::Subscribe => {
            client.subscribe(&control.channels);
            ServerMessage::new(
                message_types::SUBSCRIBED,
                "",
                json!({ "channels": control.channels, "subscriptions": client.subscriptions() }),
            )
        }
        ControlAction::Unsubscribe => {
            client.unsubscribe(&control.channels);
            ServerMessage::new(
                message_types::UNSUBSCRIBED,
                "",
                json!({ "channels": control.channels, "subscriptions": client.subscriptions() }),
            )
        }
        ControlAction::Ping => ServerMessage::new(message_types::PONG, "", Value::Null),
    }
}
