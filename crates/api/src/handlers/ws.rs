//! WebSocket升级与帧转换
//!
//! 传输层只负责在 axum 的 [`Message`] 与会话使用的 [`Frame`] 之间转换，
//! 心跳、超时和订阅控制都由 [`dashboard_hub::serve`] 处理。

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use dashboard_hub::{serve, Frame, Hub, SessionConfig};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub user_id: i64,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(hub, socket, params.user_id))
}

async fn handle_socket(hub: Arc<Hub>, socket: WebSocket, user_id: i64) {
    let (client, mailbox) = match hub.connect(user_id).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("WebSocket连接注册失败: user_id={}, error={}", user_id, e);
            return;
        }
    };
    debug!("WebSocket已连接: client_id={}, user_id={}", client.id(), user_id);

    let config = SessionConfig::from(hub.config());
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = stream.map(|message| message.map(to_frame));

    serve(hub, client, mailbox, sink, stream, config).await;
    debug!("WebSocket已断开: user_id={}", user_id);
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Default::default()),
        Frame::Pong => Message::Pong(Default::default()),
        Frame::Close => Message::Close(None),
    }
}

fn to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.to_string()),
        Message::Binary(bytes) => Frame::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Message::Ping(_) => Frame::Ping,
        Message::Pong(_) => Frame::Pong,
        Message::Close(_) => Frame::Close,
    }
}
