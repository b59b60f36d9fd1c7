use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Task manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskManagerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub progress_buffer: usize,
    pub progress_flush_interval_ms: u64,
    pub shutdown_timeout_seconds: u64,
    /// Delay between steps of the built-in simulated handlers
    pub simulated_step_delay_ms: u64,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            progress_buffer: 10,
            progress_flush_interval_ms: 5000,
            shutdown_timeout_seconds: 30,
            simulated_step_delay_ms: 1000,
        }
    }
}

impl TaskManagerConfig {
    pub fn progress_flush_interval(&self) -> Duration {
        Duration::from_millis(self.progress_flush_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn simulated_step_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_step_delay_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            return Err(anyhow::anyhow!("worker数量必须大于0"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("任务队列容量必须大于0"));
        }
        if self.progress_buffer == 0 {
            return Err(anyhow::anyhow!("进度缓冲区容量必须大于0"));
        }
        if self.progress_flush_interval_ms == 0 {
            return Err(anyhow::anyhow!("进度刷新间隔必须大于0"));
        }
        Ok(())
    }
}
