//! 内置模拟处理器
//!
//! 真实计算由外部引擎完成，这里按步骤推进进度并生成带随机指标的结果，
//! 每一步之间都经过协作检查点，因此可以被暂停和取消。

use std::time::Duration;

use async_trait::async_trait;
use dashboard_core::{
    DashboardError, DashboardResult, ExecutionScope, ProgressSink, Task, TaskHandler, TaskType,
};
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_STEPS: u8 = 5;
const DEFAULT_EPOCHS: u64 = 5;

pub struct SimulatedHandler {
    task_type: TaskType,
    name: String,
    step_delay: Duration,
}

impl SimulatedHandler {
    pub fn new(task_type: TaskType, step_delay: Duration) -> Self {
        Self {
            task_type,
            name: format!("simulated_{task_type}"),
            step_delay,
        }
    }

    /// 进度序列，首个值为 0，最后一个值为 100
    fn progress_steps(&self, task: &Task) -> DashboardResult<Vec<u8>> {
        let steps = match self.task_type {
            TaskType::ModelTraining => {
                let epochs = task
                    .config
                    .get("epochs")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_EPOCHS);
                if epochs == 0 {
                    return Err(DashboardError::handler("epochs must be greater than 0"));
                }
                epochs.min(100)
            }
            _ => u64::from(DEFAULT_STEPS),
        };

        Ok((0..=steps).map(|i| (i * 100 / steps) as u8).collect())
    }

    fn build_result(&self, task: &Task) -> Value {
        let mut rng = rand::rng();
        let config = &task.config;
        match self.task_type {
            TaskType::FactorTest => json!({
                "factor_id": config.get("factor_id").cloned().unwrap_or(Value::Null),
                "ic_mean": rng.random_range(-0.1..0.1),
                "ic_ir": rng.random_range(-1.0..1.5),
                "rank_ic": rng.random_range(-0.1..0.1),
                "turnover": rng.random_range(0.05..0.6),
                "group_returns": (0..5)
                    .map(|_| rng.random_range(-0.05..0.08))
                    .collect::<Vec<f64>>(),
            }),
            TaskType::ModelTraining => json!({
                "model_id": config.get("model_id").cloned().unwrap_or(Value::Null),
                "epochs": config.get("epochs").and_then(Value::as_u64).unwrap_or(DEFAULT_EPOCHS),
                "train_loss": rng.random_range(0.01..0.5),
                "validation_loss": rng.random_range(0.05..0.8),
                "accuracy": rng.random_range(0.5..0.95),
            }),
            TaskType::StrategyBacktest => json!({
                "strategy_id": config.get("strategy_id").cloned().unwrap_or(Value::Null),
                "total_return": rng.random_range(-0.3..0.8),
                "annual_return": rng.random_range(-0.2..0.4),
                "sharpe_ratio": rng.random_range(-1.0..3.0),
                "max_drawdown": rng.random_range(0.02..0.45),
                "win_rate": rng.random_range(0.3..0.7),
            }),
            TaskType::DataProcessing => json!({
                "dataset_id": config.get("dataset_id").cloned().unwrap_or(Value::Null),
                "rows_processed": rng.random_range(1_000..1_000_000u64),
                "rows_rejected": rng.random_range(0..500u64),
            }),
            TaskType::ReportGeneration => json!({
                "report_path": format!("reports/task_{}.pdf", task.id),
                "pages": rng.random_range(3..40u32),
            }),
            TaskType::WorkflowExecution => {
                let nodes = config
                    .get("nodes")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                json!({
                    "workflow_id": config.get("workflow_id").cloned().unwrap_or(Value::Null),
                    "nodes_completed": nodes,
                })
            }
        }
    }
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn handle(
        &self,
        scope: ExecutionScope,
        task: &Task,
        progress: ProgressSink,
    ) -> DashboardResult<Value> {
        let steps = self.progress_steps(task)?;
        let last = steps.len() - 1;

        for (i, value) in steps.into_iter().enumerate() {
            scope.checkpoint().await?;
            progress.report(value);
            debug!(task_id = task.id, handler = %self.name, progress = value, "simulated step");
            if i < last {
                scope.sleep(self.step_delay).await?;
            }
        }

        Ok(self.build_result(task))
    }
}
