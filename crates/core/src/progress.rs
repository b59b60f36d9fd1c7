//! 非阻塞进度通道
//!
//! 处理器通过 [`ProgressSink`] 汇报进度，永远不会被阻塞。每次汇报先写入共享的
//! "最新值"槽位再尝试写入有界通道，通道已满时只保留槽位中的值。
//! 刷新器排空通道后取走槽位，槽位中的值总是不旧于通道中的值。
//! 汇报端只持有弱引用发送端，任务上下文释放后所有汇报都会被丢弃。

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

const EMPTY_SLOT: u16 = u16::MAX;

/// 创建进度通道
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let latest = Arc::new(AtomicU16::new(EMPTY_SLOT));
    (
        ProgressSender {
            tx,
            latest: latest.clone(),
        },
        ProgressReceiver { rx, latest },
    )
}

/// 进度通道的强引用发送端，由任务上下文持有
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<u8>,
    latest: Arc<AtomicU16>,
}

impl ProgressSender {
    /// 派生一个交给处理器的弱引用汇报端
    pub fn sink(&self) -> ProgressSink {
        ProgressSink {
            tx: self.tx.downgrade(),
            latest: self.latest.clone(),
        }
    }
}

/// 处理器使用的进度汇报端
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::WeakSender<u8>,
    latest: Arc<AtomicU16>,
}

impl ProgressSink {
    /// 汇报进度（自动截断到100）
    ///
    /// 返回 `false` 表示任务上下文已释放，值被丢弃。
    pub fn report(&self, progress: u8) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        let progress = progress.min(100);
        self.latest.store(progress as u16, Ordering::Release);
        match tx.try_send(progress) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 一个不连接任何任务的汇报端，所有值都会被丢弃
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx: tx.downgrade(),
            latest: Arc::new(AtomicU16::new(EMPTY_SLOT)),
        }
    }
}

/// 进度通道接收端，由刷新器读取
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<u8>,
    latest: Arc<AtomicU16>,
}

impl ProgressReceiver {
    /// 排空所有待处理的进度值，返回最新的一个
    pub fn try_latest(&mut self) -> Option<u8> {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(v) => latest = Some(v),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        match self.latest.swap(EMPTY_SLOT, Ordering::AcqRel) {
            EMPTY_SLOT => latest,
            newest => Some(newest as u8),
        }
    }
}
