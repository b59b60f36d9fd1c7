//! 配置管理
//!
//! `AppConfig` 由三层叠加而成：
//! 1. 内置默认值
//! 2. TOML配置文件（`--config` 指定，或 `config/dashboard.toml`、`dashboard.toml`）
//! 3. 环境变量覆盖（`DASHBOARD__SECTION__KEY`）
//!
//! 加载后统一执行验证。

pub mod models;

pub use models::*;
