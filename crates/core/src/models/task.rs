use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DashboardError;

/// 任务定义
///
/// 表示一次异步、可取消、可汇报进度的计算任务，由外部存储持有。
/// 任务管理器只会修改状态、进度、结果、错误以及起止时间字段。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符（由存储分配）
/// - `user_id`: 任务所属用户，0 表示系统任务
/// - `task_type`: 任务类型标签，原样保存，执行时才解析为 [`TaskType`]
/// - `config` / `result`: 对核心不透明的 JSON 载荷
/// - `progress`: 0 到 100 的进度
///
/// # 使用示例
///
/// ```rust
/// use dashboard_core::models::{Task, TaskType, TaskStatus};
/// use serde_json::json;
///
/// let task = Task::new(42, "动量因子检验", TaskType::FactorTest, json!({"factor_id": 7}));
/// assert_eq!(task.status, TaskStatus::Queued);
/// assert_eq!(task.progress, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub config: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 创建新任务
    pub fn new(
        user_id: i64,
        name: impl Into<String>,
        task_type: TaskType,
        config: serde_json::Value,
    ) -> Self {
        Self::with_raw_type(user_id, name, task_type.as_str(), config)
    }

    /// 使用未经校验的类型标签创建任务
    pub fn with_raw_type(
        user_id: i64,
        name: impl Into<String>,
        task_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储生成
            user_id,
            name: name.into(),
            task_type: task_type.into(),
            status: TaskStatus::Queued,
            progress: 0,
            config,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 解析任务类型标签
    pub fn parsed_type(&self) -> Result<TaskType, DashboardError> {
        self.task_type.parse()
    }

    /// 将字段级更新应用到本地副本
    pub fn apply(&mut self, update: &TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        if let Some(started_at) = update.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(ended_at) = update.ended_at {
            self.ended_at = Some(ended_at);
        }
        self.updated_at = Utc::now();
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ModelTraining,
    StrategyBacktest,
    FactorTest,
    DataProcessing,
    ReportGeneration,
    WorkflowExecution,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::ModelTraining,
        TaskType::StrategyBacktest,
        TaskType::FactorTest,
        TaskType::DataProcessing,
        TaskType::ReportGeneration,
        TaskType::WorkflowExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ModelTraining => "model_training",
            TaskType::StrategyBacktest => "strategy_backtest",
            TaskType::FactorTest => "factor_test",
            TaskType::DataProcessing => "data_processing",
            TaskType::ReportGeneration => "report_generation",
            TaskType::WorkflowExecution => "workflow_execution",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DashboardError::UnsupportedTaskType(s.to_string()))
    }
}

/// 任务状态
///
/// - `Queued`: 已提交，等待worker领取（初始状态）
/// - `Running`: 正在由处理器执行
/// - `Paused`: 处理器在协作检查点处等待恢复
/// - `Completed` / `Failed` / `Cancelled`: 终止状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// 检查是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(DashboardError::Serialization(format!(
                "invalid task status: {s}"
            ))),
        }
    }
}

/// 字段级更新
///
/// 只有 `Some` 的字段会写入存储。`error` 为 `Some(None)` 时表示清空错误信息。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub error: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress.min(100)),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn ended_now(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub user_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    /// 检查任务是否匹配过滤条件（不考虑分页）
    pub fn matches(&self, task: &Task) -> bool {
        self.user_id.is_none_or(|u| task.user_id == u)
            && self.status.is_none_or(|s| task.status == s)
            && self
                .task_type
                .as_deref()
                .is_none_or(|t| task.task_type == t)
    }
}

/// `Status(id)` 返回的任务状态视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusInfo {
    pub task_id: i64,
    pub user_id: i64,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 当前是否持有存活的执行上下文
    pub live: bool,
}

impl TaskStatusInfo {
    pub fn from_task(task: &Task, live: bool) -> Self {
        Self {
            task_id: task.id,
            user_id: task.user_id,
            task_type: task.task_type.clone(),
            status: task.status,
            progress: task.progress,
            result: task.result.clone(),
            error: task.error.clone(),
            started_at: task.started_at,
            ended_at: task.ended_at,
            live,
        }
    }
}

/// 一次执行的最终结果，通过任务上下文的完成通道送达观察者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: TaskStatus::Cancelled,
            result: None,
            error: None,
        }
    }
}

/// 分页查询结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPage {
    pub total: i64,
    pub tasks: Vec<Task>,
}
