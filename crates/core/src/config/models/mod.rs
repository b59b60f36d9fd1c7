pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod hub;
pub mod task_manager;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseBackend, DatabaseConfig};
pub use hub::HubConfig;
pub use task_manager::TaskManagerConfig;
