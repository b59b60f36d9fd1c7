use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Realtime hub and client session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub mailbox_capacity: usize,
    pub write_wait_seconds: u64,
    pub pong_wait_seconds: u64,
    pub ping_period_seconds: u64,
    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            write_wait_seconds: 10,
            pong_wait_seconds: 60,
            ping_period_seconds: 54,
            max_message_size: 512,
        }
    }
}

impl HubConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(anyhow::anyhow!("客户端邮箱容量必须大于0"));
        }
        if self.write_wait_seconds == 0 {
            return Err(anyhow::anyhow!("写超时时间必须大于0"));
        }
        if self.ping_period_seconds == 0 || self.ping_period_seconds >= self.pong_wait_seconds {
            return Err(anyhow::anyhow!(
                "ping周期({}s)必须大于0且小于pong等待时间({}s)",
                self.ping_period_seconds,
                self.pong_wait_seconds
            ));
        }
        if self.max_message_size == 0 {
            return Err(anyhow::anyhow!("最大消息大小必须大于0"));
        }
        Ok(())
    }
}
