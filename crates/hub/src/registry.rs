//! 连接注册中心
//!
//! 注册与注销只由控制循环处理，因此完全有序；扇出只持有客户端集合的读锁。
//! 邮箱已满的客户端在扇出时立即关闭，并排队等待控制循环注销。

use std::collections::HashMap;
use std::sync::Arc;

use dashboard_core::{DashboardError, DashboardResult, HubConfig};
use metrics::{counter, gauge};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Client, Delivery};
use crate::protocol::{message_types, ServerMessage};

type RegisterRequest = (Arc<Client>, oneshot::Sender<()>);

struct ControlQueues {
    register_rx: mpsc::UnboundedReceiver<RegisterRequest>,
    unregister_rx: mpsc::UnboundedReceiver<Arc<Client>>,
}

/// 连接中心
pub struct Hub {
    config: HubConfig,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    register_tx: mpsc::UnboundedSender<RegisterRequest>,
    unregister_tx: mpsc::UnboundedSender<Arc<Client>>,
    queues: Mutex<Option<ControlQueues>>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            queues: Mutex::new(Some(ControlQueues {
                register_rx,
                unregister_rx,
            })),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// 启动控制循环
    ///
    /// 取消 `shutdown` 后关闭所有邮箱并清空客户端集合。
    pub async fn start(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> DashboardResult<JoinHandle<()>> {
        let queues = self.queues.lock().await.take().ok_or_else(|| {
            DashboardError::Internal("hub control loop already started".to_string())
        })?;

        let hub = Arc::clone(self);
        Ok(tokio::spawn(async move {
            hub.run(queues, shutdown).await;
        }))
    }

    async fn run(&self, mut queues: ControlQueues, shutdown: CancellationToken) {
        info!("连接中心控制循环已启动");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(client) = queues.unregister_rx.recv() => {
                    self.handle_unregister(&client).await;
                }
                Some((client, ack)) = queues.register_rx.recv() => {
                    self.handle_register(client).await;
                    let _ = ack.send(());
                }
                else => break,
            }
        }
        self.close_all().await;
        info!("连接中心控制循环已停止");
    }

    async fn handle_register(&self, client: Arc<Client>) {
        let count = {
            let mut clients = self.clients.write().await;
            clients.insert(client.id().to_string(), Arc::clone(&client));
            clients.len()
        };
        gauge!("hub_clients").set(count as f64);

        let welcome = ServerMessage::new(
            message_types::CONNECTED,
            "",
            json!({ "client_id": client.id(), "user_id": client.user_id() }),
        )
        .with_user(client.user_id());

        let delivery = match welcome.to_frame() {
            Ok(frame) => client.try_deliver(frame),
            Err(e) => {
                warn!(client_id = client.id(), error = %e, "failed to serialize welcome");
                Delivery::Queued
            }
        };

        if delivery == Delivery::Queued {
            info!(
                client_id = client.id(),
                user_id = client.user_id(),
                clients = count,
                "client registered"
            );
        } else {
            warn!(
                client_id = client.id(),
                ?delivery,
                "client mailbox unusable at registration, disconnecting"
            );
            self.handle_unregister(&client).await;
        }
    }

    async fn handle_unregister(&self, client: &Arc<Client>) {
        let removed = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(client.id()).is_some();
            gauge!("hub_clients").set(clients.len() as f64);
            removed
        };
        client.close();
        if removed {
            info!(client_id = client.id(), user_id = client.user_id(), "client unregistered");
        }
    }

    async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        for client in clients.values() {
            client.close();
        }
        let closed = clients.len();
        clients.clear();
        gauge!("hub_clients").set(0.0);
        info!(closed, "all client mailboxes closed");
    }

    /// 注册客户端，控制循环处理完成后返回
    pub async fn register(&self, client: Arc<Client>) -> DashboardResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.register_tx.send((Arc::clone(&client), ack_tx)).is_err() {
            client.close();
            return Err(DashboardError::Transport("hub is not running".to_string()));
        }
        ack_rx.await.map_err(|_| {
            client.close();
            DashboardError::Transport("hub stopped before registration completed".to_string())
        })
    }

    /// 创建并注册一个新客户端
    pub async fn connect(
        &self,
        user_id: i64,
    ) -> DashboardResult<(Arc<Client>, mpsc::Receiver<Arc<String>>)> {
        let (client, mailbox) = Client::new(user_id, self.config.mailbox_capacity);
        self.register(Arc::clone(&client)).await?;
        Ok((client, mailbox))
    }

    /// 关闭客户端邮箱并排队注销，可重复调用
    pub fn unregister(&self, client: &Arc<Client>) {
        client.close();
        if self.unregister_tx.send(Arc::clone(client)).is_err() {
            debug!(client_id = client.id(), "hub stopped, unregister skipped");
        }
    }

    /// 发送给所有客户端
    pub async fn broadcast_to_all(&self, message: &ServerMessage) -> usize {
        self.fan_out(message, "all", |_| true).await
    }

    /// 发送给订阅了指定频道的客户端
    pub async fn broadcast_to_channel(&self, channel: &str, message: &ServerMessage) -> usize {
        self.fan_out(message, channel, |c| c.is_subscribed(channel)).await
    }

    /// 发送给指定用户名下订阅了该频道的连接
    pub async fn broadcast_to_channel_for_user(
        &self,
        channel: &str,
        user_id: i64,
        message: &ServerMessage,
    ) -> usize {
        self.fan_out(message, channel, |c| {
            c.user_id() == user_id && c.is_subscribed(channel)
        })
        .await
    }

    /// 发送给指定用户的所有连接
    pub async fn send_to_user(&self, user_id: i64, message: &ServerMessage) -> usize {
        self.fan_out(message, "user", |c| c.user_id() == user_id).await
    }

    /// 序列化一次，非阻塞地投递到每个匹配的邮箱，返回成功投递数
    async fn fan_out(
        &self,
        message: &ServerMessage,
        label: &str,
        filter: impl Fn(&Client) -> bool,
    ) -> usize {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    message_type = %message.message_type,
                    error = %e,
                    "failed to serialize message"
                );
                return 0;
            }
        };

        let mut evicted = Vec::new();
        let mut delivered = 0usize;
        {
            let clients = self.clients.read().await;
            for client in clients.values() {
                if !filter(client) {
                    continue;
                }
                match client.try_deliver(Arc::clone(&frame)) {
                    Delivery::Queued => delivered += 1,
                    Delivery::Full => {
                        counter!("hub_slow_client_disconnects_total").increment(1);
                        warn!(
                            client_id = client.id(),
                            user_id = client.user_id(),
                            label,
                            "client mailbox full, disconnecting slow client"
                        );
                        evicted.push(Arc::clone(client));
                    }
                    Delivery::Closed => evicted.push(Arc::clone(client)),
                }
            }
        }

        for client in &evicted {
            self.unregister(client);
        }

        debug!(
            message_type = %message.message_type,
            label,
            delivered,
            evicted = evicted.len(),
            "fan-out complete"
        );
        delivered
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn contains(&self, client_id: &str) -> bool {
        self.clients.read().await.contains_key(client_id)
    }
}
