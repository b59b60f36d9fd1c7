use dashboard_core::progress::{progress_channel, ProgressReceiver, ProgressSender};
use dashboard_core::{ExecutionScope, ProgressSink, Task, TaskOutcome, TaskStatus};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const NOTIFY_CAPACITY: usize = 16;

/// 一次存活的任务执行记录
///
/// 持有从根令牌派生的取消令牌、暂停闸门，以及四个单向通道
/// （进度、状态、错误、完成）。所有通道在 [`TaskContext::close`] 中关闭且只关闭一次。
pub struct TaskContext {
    task: Task,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    state: Mutex<TaskStatus>,
    progress_tx: Mutex<Option<ProgressSender>>,
    progress_rx: Mutex<ProgressReceiver>,
    status_tx: Mutex<Option<broadcast::Sender<TaskStatus>>>,
    error_tx: Mutex<Option<broadcast::Sender<String>>>,
    complete_tx: Mutex<Option<watch::Sender<Option<TaskOutcome>>>>,
    complete_rx: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskContext {
    pub fn new(task: Task, cancel: CancellationToken, progress_buffer: usize) -> Self {
        let (progress_tx, progress_rx) = progress_channel(progress_buffer);
        let (status_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (error_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (complete_tx, complete_rx) = watch::channel(None);
        let (pause, _) = watch::channel(false);

        Self {
            task,
            cancel,
            pause,
            state: Mutex::new(TaskStatus::Queued),
            progress_tx: Mutex::new(Some(progress_tx)),
            progress_rx: Mutex::new(progress_rx),
            status_tx: Mutex::new(Some(status_tx)),
            error_tx: Mutex::new(Some(error_tx)),
            complete_tx: Mutex::new(Some(complete_tx)),
            complete_rx,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn id(&self) -> i64 {
        self.task.id
    }

    pub fn user_id(&self) -> i64 {
        self.task.user_id
    }

    pub fn state(&self) -> TaskStatus {
        *self.state.lock()
    }

    pub fn set_state(&self, status: TaskStatus) {
        *self.state.lock() = status;
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.set_state(TaskStatus::Paused);
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.set_state(TaskStatus::Running);
        self.pause.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// 交给处理器的执行范围
    pub fn execution_scope(&self) -> ExecutionScope {
        ExecutionScope::new(self.cancel.clone(), self.pause.subscribe())
    }

    /// 交给处理器的进度汇报端；上下文关闭后返回一个丢弃所有值的汇报端
    pub fn progress_sink(&self) -> ProgressSink {
        self.progress_tx
            .lock()
            .as_ref()
            .map(ProgressSender::sink)
            .unwrap_or_else(ProgressSink::detached)
    }

    /// 排空进度通道，返回最新进度
    pub fn take_progress(&self) -> Option<u8> {
        self.progress_rx.lock().try_latest()
    }

    pub fn notify_status(&self, status: TaskStatus) {
        if let Some(tx) = self.status_tx.lock().as_ref() {
            let _ = tx.send(status);
        }
    }

    pub fn notify_error(&self, error: &str) {
        if let Some(tx) = self.error_tx.lock().as_ref() {
            let _ = tx.send(error.to_string());
        }
    }

    pub fn subscribe_status(&self) -> Option<broadcast::Receiver<TaskStatus>> {
        self.status_tx.lock().as_ref().map(broadcast::Sender::subscribe)
    }

    pub fn subscribe_errors(&self) -> Option<broadcast::Receiver<String>> {
        self.error_tx.lock().as_ref().map(broadcast::Sender::subscribe)
    }

    pub fn observe(&self) -> TaskObserver {
        TaskObserver {
            complete: self.complete_rx.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.complete_tx.lock().is_none()
    }

    /// 发布最终结果并关闭全部通道
    ///
    /// 只有第一次调用生效并返回 `true`。
    pub fn close(&self, outcome: TaskOutcome) -> bool {
        let Some(complete) = self.complete_tx.lock().take() else {
            return false;
        };
        self.set_state(outcome.status);
        complete.send_replace(Some(outcome));
        drop(complete);

        self.status_tx.lock().take();
        self.error_tx.lock().take();
        self.progress_tx.lock().take();
        true
    }
}

/// 任务完成观察者
#[derive(Clone)]
pub struct TaskObserver {
    complete: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskObserver {
    /// 等待任务结束；上下文关闭前未给出结果时返回 `None`
    pub async fn wait(mut self) -> Option<TaskOutcome> {
        self.complete
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone())
    }
}
