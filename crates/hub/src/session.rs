//! 客户端会话
//!
//! 每个连接一个入站泵和一个出站泵，与具体传输解耦：
//! 传输适配层（例如 WebSocket 升级）只需提供 [`Frame`] 的 `Sink` 和 `Stream`。
//!
//! - 入站泵：在读截止时间内读取帧，收到 pong 时刷新截止时间；
//!   超长帧、读错误、关闭帧或截止时间到期都会结束会话
//! - 出站泵：取出邮箱消息，把已排队的消息合并成一次写入（逐条 feed，一次 flush），
//!   按 `ping_period` 发送 ping，每次写入受 `write_wait` 限制；邮箱关闭后发送关闭帧

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use dashboard_core::HubConfig;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{Client, Delivery};
use crate::protocol::handle_control;
use crate::registry::Hub;

/// 传输无关的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Pong,
    Close,
}

/// 会话时间参数
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
}

impl From<&HubConfig> for SessionConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            write_wait: config.write_wait(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            max_message_size: config.max_message_size,
        }
    }
}

/// 运行一个已注册客户端的会话，直到任一方向结束
///
/// 返回前客户端邮箱已关闭，并已排队注销。
#[instrument(skip_all, fields(client_id = %client.id(), user_id = client.user_id()))]
pub async fn serve<S, R, E>(
    hub: Arc<Hub>,
    client: Arc<Client>,
    mailbox: mpsc::Receiver<Arc<String>>,
    sink: S,
    stream: R,
    config: SessionConfig,
) where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let done = CancellationToken::new();

    tokio::join!(
        write_pump(&client, mailbox, sink, &config, &done),
        read_pump(&client, stream, &config, &done),
    );

    hub.unregister(&client);
    info!("client session ended");
}

async fn write_pump<S>(
    client: &Client,
    mut mailbox: mpsc::Receiver<Arc<String>>,
    mut sink: S,
    config: &SessionConfig,
    done: &CancellationToken,
) where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = mailbox.recv() => {
                let Some(first) = message else {
                    // 邮箱已关闭
                    let _ = timeout(config.write_wait, sink.send(Frame::Close)).await;
                    break;
                };
                let burst = async {
                    sink.feed(Frame::Text(first.as_str().to_owned())).await?;
                    while let Ok(next) = mailbox.try_recv() {
                        sink.feed(Frame::Text(next.as_str().to_owned())).await?;
                    }
                    sink.flush().await
                };
                match timeout(config.write_wait, burst).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "write failed");
                        break;
                    }
                    Err(_) => {
                        warn!("write timed out");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match timeout(config.write_wait, sink.send(Frame::Ping)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "ping failed");
                        break;
                    }
                    Err(_) => {
                        warn!("ping timed out");
                        break;
                    }
                }
            }
            _ = done.cancelled() => {
                let _ = timeout(config.write_wait, sink.send(Frame::Close)).await;
                break;
            }
        }
    }

    client.close();
    done.cancel();
}

async fn read_pump<R, E>(
    client: &Client,
    mut stream: R,
    config: &SessionConfig,
    done: &CancellationToken,
) where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => break,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!("read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong => deadline = Instant::now() + config.pong_wait,
            Frame::Ping => {}
            Frame::Close => break,
            Frame::Text(text) => {
                if text.len() > config.max_message_size {
                    warn!(
                        size = text.len(),
                        limit = config.max_message_size,
                        "inbound frame too large"
                    );
                    break;
                }
                let reply = handle_control(client, &text);
                let delivery = match reply.to_frame() {
                    Ok(frame) => client.try_deliver(frame),
                    Err(e) => {
                        warn!(error = %e, "failed to serialize reply");
                        continue;
                    }
                };
                if delivery != Delivery::Queued {
                    warn!(?delivery, "reply could not be queued, ending session");
                    break;
                }
            }
        }
    }

    client.close();
    done.cancel();
}
