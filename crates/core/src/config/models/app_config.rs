use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    hub::HubConfig,
    task_manager::TaskManagerConfig,
};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/dashboard.toml", "dashboard.toml"];
const ENV_PREFIX: &str = "DASHBOARD";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub task_manager: TaskManagerConfig,
    pub hub: HubConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`DASHBOARD__SECTION__KEY`)
    ///
    /// An explicit `config_path` must exist; the default paths are optional.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.task_manager
            .validate()
            .context("任务管理器配置验证失败")?;
        self.hub.validate().context("连接中心配置验证失败")?;
        self.database.validate().context("数据库配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseBackend;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_manager.workers, 4);
        assert_eq!(config.task_manager.queue_capacity, 100);
        assert_eq!(config.hub.ping_period_seconds, 54);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [task_manager]
            workers = 8

            [database]
            backend = "sqlite"
            url = "sqlite://data/tasks.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.task_manager.workers, 8);
        assert_eq!(config.task_manager.queue_capacity, 100);
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.hub.max_message_size, 512);
    }

    #[test]
    fn ping_period_must_be_shorter_than_pong_wait() {
        let err = AppConfig::from_toml(
            r#"
            [hub]
            ping_period_seconds = 60
            pong_wait_seconds = 60
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("ping"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[task_manager]\nqueue_capacity = 7\n\n[observability]\nlog_format = \"json\""
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.task_manager.queue_capacity, 7);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.task_manager.workers, 4);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(AppConfig::load(Some("/nonexistent/dashboard.toml")).is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }
}
