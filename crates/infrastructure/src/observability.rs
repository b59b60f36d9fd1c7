use anyhow::{Context, Result};
use dashboard_core::config::ObservabilityConfig;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化结构化日志
///
/// `RUST_LOG` 优先于配置中的级别。
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format.as_str() {
        "json" => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_thread_ids(true);
            registry
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize logging")?;
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false);
            registry
                .with(fmt_layer)
                .try_init()
                .context("Failed to initialize logging")?;
        }
    }

    info!(
        "Logging initialized: level={}, format={}",
        config.log_level, config.log_format
    );
    Ok(())
}

/// 安装全局Prometheus记录器，返回用于渲染 `/metrics` 的句柄
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    describe_metrics();
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("tasks_submitted_total", "Tasks accepted into the queue");
    describe_counter!("tasks_finished_total", "Tasks that reached a terminal state");
    describe_gauge!("tasks_live", "Tasks with a live execution context");
    describe_gauge!("hub_clients", "Registered realtime clients");
    describe_counter!(
        "hub_slow_client_disconnects_total",
        "Clients evicted because their mailbox was full"
    );
    describe_counter!("events_published_total", "Lifecycle events published");
}
