use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashboard_core::{
    DashboardError, DashboardResult, Event, EventPublisher, Task, TaskFilter, TaskHandler,
    TaskManagerConfig, TaskOutcome, TaskPage, TaskRepository, TaskStatus, TaskStatusInfo,
    TaskUpdate,
};
use futures::future::join_all;
use futures::FutureExt;
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler_registry::HandlerRegistry;
use crate::task_context::TaskContext;

const QUEUE_FULL_MESSAGE: &str = "task queue is full";

/// 任务管理器
///
/// 有界FIFO队列 + 固定数量的worker。存活任务表是唯一的互斥结构，
/// 提交、开始执行、完成、取消、暂停和进度刷新都在这把锁下修改任务状态，
/// 因此同一任务的持久化写入不会乱序。进度事件也在锁内发布，
/// 发布器不能回调任务管理器。
pub struct TaskManager {
    config: TaskManagerConfig,
    repository: Arc<dyn TaskRepository>,
    publisher: Arc<dyn EventPublisher>,
    handlers: HandlerRegistry,
    live: Mutex<HashMap<i64, Arc<TaskContext>>>,
    queue_tx: mpsc::Sender<Arc<TaskContext>>,
    queue_rx: Mutex<mpsc::Receiver<Arc<TaskContext>>>,
    root: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new(
        config: TaskManagerConfig,
        repository: Arc<dyn TaskRepository>,
        publisher: Arc<dyn EventPublisher>,
        handlers: HandlerRegistry,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            repository,
            publisher,
            handlers,
            live: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            root: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// 启动worker池和进度刷新器
    pub async fn start(self: &Arc<Self>) -> DashboardResult<()> {
        let mut workers = self.workers.lock().await;
        if self.root.is_cancelled() {
            return Err(DashboardError::ManagerShuttingDown);
        }
        if !workers.is_empty() {
            return Err(DashboardError::Internal(
                "task manager already started".to_string(),
            ));
        }

        for worker_id in 0..self.config.workers {
            let manager = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                manager.worker_loop(worker_id).await;
            }));
        }

        let manager = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            manager.flush_loop().await;
        }));

        info!(
            "Task manager started: workers={}, queue_capacity={}, flush_interval={:?}",
            self.config.workers,
            self.config.queue_capacity,
            self.config.progress_flush_interval()
        );
        Ok(())
    }

    /// 提交任务到队列，成功后立即返回
    pub async fn submit(&self, task: Task) -> DashboardResult<()> {
        let id = task.id;
        let user_id = task.user_id;

        {
            let mut live = self.live.lock().await;
            if self.root.is_cancelled() {
                return Err(DashboardError::ManagerShuttingDown);
            }
            if live.contains_key(&id) {
                return Err(DashboardError::TaskAlreadyActive { id });
            }

            let queued = TaskUpdate::status(TaskStatus::Queued)
                .with_progress(0)
                .clear_error();
            self.repository.update_fields(id, &queued).await?;

            let context = Arc::new(TaskContext::new(
                task,
                self.root.child_token(),
                self.config.progress_buffer,
            ));
            live.insert(id, Arc::clone(&context));

            match self.queue_tx.try_send(context) {
                Ok(()) => {
                    gauge!("tasks_live").set(live.len() as f64);
                }
                Err(TrySendError::Full(context)) => {
                    live.remove(&id);
                    let failed = TaskUpdate::status(TaskStatus::Failed)
                        .with_error(QUEUE_FULL_MESSAGE)
                        .ended_now();
                    if let Err(e) = self.repository.update_fields(id, &failed).await {
                        error!("Failed to persist rejected task {}: {}", id, e);
                    }
                    context.close(TaskOutcome::failed(QUEUE_FULL_MESSAGE));
                    drop(live);

                    warn!(
                        task_id = id,
                        capacity = self.config.queue_capacity,
                        "task queue is full, rejecting task"
                    );
                    counter!("tasks_finished_total", "status" => TaskStatus::Failed.as_str())
                        .increment(1);
                    self.publisher
                        .publish(Event::task_status(
                            user_id,
                            id,
                            TaskStatus::Failed,
                            Some(QUEUE_FULL_MESSAGE),
                        ))
                        .await;
                    return Err(DashboardError::QueueFull {
                        capacity: self.config.queue_capacity,
                    });
                }
                Err(TrySendError::Closed(context)) => {
                    live.remove(&id);
                    context.close(TaskOutcome::cancelled());
                    return Err(DashboardError::ManagerShuttingDown);
                }
            }
        }

        counter!("tasks_submitted_total").increment(1);
        debug!(task_id = id, user_id, "task queued");
        self.publisher
            .publish(Event::task_status(user_id, id, TaskStatus::Queued, None))
            .await;
        Ok(())
    }

    /// 先在存储中创建任务再提交
    pub async fn create_and_submit(&self, task: Task) -> DashboardResult<Task> {
        let mut created = self.repository.create(&task).await?;
        self.submit(created.clone()).await?;
        created.apply(
            &TaskUpdate::status(TaskStatus::Queued)
                .with_progress(0)
                .clear_error(),
        );
        Ok(created)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "worker started");
        loop {
            let next = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.root.cancelled() => None,
                    next = queue.recv() => next,
                }
            };
            let Some(context) = next else {
                break;
            };
            self.execute(context).await;
        }
        debug!(worker_id, "worker stopped");
    }

    async fn execute(&self, context: Arc<TaskContext>) {
        let id = context.id();

        {
            let live = self.live.lock().await;
            if !is_current(&live, &context) {
                debug!(task_id = id, "task released before execution, skipping");
                return;
            }
            if context.is_cancelled() {
                drop(live);
                self.complete(&context, Err(DashboardError::Cancelled)).await;
                return;
            }

            context.set_state(TaskStatus::Running);
            let running = TaskUpdate::status(TaskStatus::Running).started_now();
            if let Err(e) = self.repository.update_fields(id, &running).await {
                error!("Failed to mark task {} running: {}", id, e);
            }
        }

        context.notify_status(TaskStatus::Running);
        self.publisher
            .publish(Event::task_status(
                context.user_id(),
                id,
                TaskStatus::Running,
                None,
            ))
            .await;

        let handler = context
            .task()
            .parsed_type()
            .ok()
            .and_then(|task_type| self.handlers.get(task_type));
        let result = match handler {
            Some(handler) => self.run_handler(handler, &context).await,
            None => {
                warn!(
                    task_id = id,
                    task_type = %context.task().task_type,
                    "no handler for task type"
                );
                Err(DashboardError::UnsupportedTaskType(
                    context.task().task_type.clone(),
                ))
            }
        };

        self.complete(&context, result).await;
    }

    async fn run_handler(
        &self,
        handler: Arc<dyn TaskHandler>,
        context: &TaskContext,
    ) -> DashboardResult<Value> {
        info!(
            "Executing task {} with handler {}",
            context.id(),
            handler.name()
        );
        let scope = context.execution_scope();
        let sink = context.progress_sink();

        match AssertUnwindSafe(handler.handle(scope, context.task(), sink))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(
                    task_id = context.id(),
                    handler = handler.name(),
                    panic = %message,
                    "handler panicked during execution"
                );
                Err(DashboardError::handler(format!(
                    "handler panicked: {message}"
                )))
            }
        }
    }

    /// 记录执行结果
    ///
    /// 任务已被取消或关闭时结果被丢弃。
    async fn complete(&self, context: &Arc<TaskContext>, result: DashboardResult<Value>) {
        let id = context.id();

        let outcome = {
            let mut live = self.live.lock().await;
            if !is_current(&live, context) {
                debug!(task_id = id, "task already released, dropping outcome");
                return;
            }
            live.remove(&id);
            gauge!("tasks_live").set(live.len() as f64);

            let (outcome, update) = match result {
                Ok(value) => (
                    TaskOutcome::completed(value.clone()),
                    TaskUpdate::status(TaskStatus::Completed)
                        .with_progress(100)
                        .with_result(value)
                        .ended_now(),
                ),
                Err(_) if context.is_cancelled() => (
                    TaskOutcome::cancelled(),
                    TaskUpdate::status(TaskStatus::Cancelled).ended_now(),
                ),
                Err(e) => {
                    let message = error_text(e);
                    (
                        TaskOutcome::failed(message.clone()),
                        TaskUpdate::status(TaskStatus::Failed)
                            .with_error(message)
                            .ended_now(),
                    )
                }
            };

            if let Err(e) = self.repository.update_fields(id, &update).await {
                error!("Failed to persist outcome of task {}: {}", id, e);
            }
            outcome
        };

        match outcome.status {
            TaskStatus::Completed => info!("Task {} completed", id),
            TaskStatus::Failed => warn!(
                "Task {} failed: {}",
                id,
                outcome.error.as_deref().unwrap_or_default()
            ),
            _ => info!("Task {} {}", id, outcome.status),
        }

        self.release(context, outcome).await;
    }

    /// 通知、发布并关闭上下文
    async fn release(&self, context: &TaskContext, outcome: TaskOutcome) {
        let id = context.id();
        let user_id = context.user_id();

        counter!("tasks_finished_total", "status" => outcome.status.as_str()).increment(1);
        context.notify_status(outcome.status);
        if let Some(error) = &outcome.error {
            context.notify_error(error);
        }

        self.publisher
            .publish(Event::task_status(
                user_id,
                id,
                outcome.status,
                outcome.error.as_deref(),
            ))
            .await;
        if let (TaskStatus::Completed, Some(result)) = (outcome.status, &outcome.result) {
            self.publisher
                .publish(Event::task_completed(user_id, id, result))
                .await;
        }

        context.close(outcome);
    }

    /// 取消存活任务，不等待worker退出
    pub async fn cancel(&self, id: i64) -> DashboardResult<()> {
        let context = {
            let mut live = self.live.lock().await;
            let context = live
                .remove(&id)
                .ok_or(DashboardError::TaskNotFound { id })?;
            gauge!("tasks_live").set(live.len() as f64);
            context.cancel();

            let cancelled = TaskUpdate::status(TaskStatus::Cancelled).ended_now();
            if let Err(e) = self.repository.update_fields(id, &cancelled).await {
                error!("Failed to persist cancellation of task {}: {}", id, e);
            }
            context
        };

        info!("Task {} cancelled", id);
        self.release(&context, TaskOutcome::cancelled()).await;
        Ok(())
    }

    /// 暂停运行中的任务，处理器在下一个检查点阻塞
    pub async fn pause(&self, id: i64) -> DashboardResult<()> {
        self.transition(id, TaskStatus::Running, TaskStatus::Paused, "pause")
            .await
    }

    pub async fn resume(&self, id: i64) -> DashboardResult<()> {
        self.transition(id, TaskStatus::Paused, TaskStatus::Running, "resume")
            .await
    }

    async fn transition(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
        action: &'static str,
    ) -> DashboardResult<()> {
        let context = {
            let live = self.live.lock().await;
            let context = live
                .get(&id)
                .cloned()
                .ok_or(DashboardError::TaskNotFound { id })?;
            let status = context.state();
            if status != from {
                return Err(DashboardError::InvalidTaskState { id, status, action });
            }

            self.repository
                .update_fields(id, &TaskUpdate::status(to))
                .await?;
            match to {
                TaskStatus::Paused => context.pause(),
                _ => context.resume(),
            }
            context
        };

        debug!(task_id = id, action, "task state changed");
        context.notify_status(to);
        self.publisher
            .publish(Event::task_status(context.user_id(), id, to, None))
            .await;
        Ok(())
    }

    /// 把每个存活任务的最新进度写入存储并发布进度事件，返回写入数量
    ///
    /// 发布在存活表锁内完成，完成事件只能排在这些进度事件之后。
    pub async fn flush_progress(&self) -> usize {
        let live = self.live.lock().await;
        let mut flushed = 0;
        for context in live.values() {
            let Some(progress) = context.take_progress() else {
                continue;
            };
            if let Err(e) = self
                .repository
                .update_fields(context.id(), &TaskUpdate::progress(progress))
                .await
            {
                warn!(
                    "Failed to persist progress of task {}: {}",
                    context.id(),
                    e
                );
                continue;
            }
            self.publisher
                .publish(Event::task_progress(
                    context.user_id(),
                    context.id(),
                    progress,
                ))
                .await;
            flushed += 1;
        }
        flushed
    }

    async fn flush_loop(self: Arc<Self>) {
        let period = self.config.progress_flush_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = self.flush_progress().await;
                    if flushed > 0 {
                        debug!(flushed, "progress flushed");
                    }
                }
            }
        }
        debug!("progress flusher stopped");
    }

    pub async fn status(&self, id: i64) -> DashboardResult<TaskStatusInfo> {
        let task = self
            .repository
            .get(id)
            .await?
            .ok_or(DashboardError::TaskNotFound { id })?;
        let live = self.live.lock().await.contains_key(&id);
        Ok(TaskStatusInfo::from_task(&task, live))
    }

    /// 等待任务结束后返回其状态；任务不在执行中时直接返回当前状态
    pub async fn wait_for_completion(&self, id: i64) -> DashboardResult<TaskStatusInfo> {
        let observer = self.live.lock().await.get(&id).map(|c| c.observe());
        if let Some(observer) = observer {
            observer.wait().await;
        }
        self.status(id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> DashboardResult<TaskPage> {
        let total = self.repository.count(filter).await?;
        let tasks = self.repository.find(filter).await?;
        Ok(TaskPage { total, tasks })
    }

    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    pub async fn is_live(&self, id: i64) -> bool {
        self.live.lock().await.contains_key(&id)
    }

    /// 优雅停机
    ///
    /// 取消根令牌，等待worker退出（受 `shutdown_timeout` 限制），
    /// 然后把仍在存活表中的任务标记为已取消。
    pub async fn shutdown(&self) {
        info!("Shutting down task manager");
        self.root.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, join_all(handles))
            .await
            .is_err()
        {
            warn!("Workers did not stop within {:?}", timeout);
        }

        let remaining: Vec<Arc<TaskContext>> = {
            let mut live = self.live.lock().await;
            let remaining = live.drain().map(|(_, context)| context).collect();
            gauge!("tasks_live").set(0.0);
            remaining
        };

        for context in &remaining {
            let cancelled = TaskUpdate::status(TaskStatus::Cancelled).ended_now();
            if let Err(e) = self
                .repository
                .update_fields(context.id(), &cancelled)
                .await
            {
                error!(
                    "Failed to persist cancellation of task {}: {}",
                    context.id(),
                    e
                );
            }
            self.release(context, TaskOutcome::cancelled()).await;
        }

        info!(
            "Task manager stopped, {} unfinished tasks cancelled",
            remaining.len()
        );
    }
}

fn is_current(live: &HashMap<i64, Arc<TaskContext>>, context: &Arc<TaskContext>) -> bool {
    live.get(&context.id())
        .is_some_and(|current| Arc::ptr_eq(current, context))
}

/// 持久化到任务上的错误文本
fn error_text(error: DashboardError) -> String {
    match error {
        DashboardError::Handler(message) => message,
        other => other.to_string(),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
