pub mod event_publisher;
pub mod repository;
pub mod task_handler;

pub use event_publisher::*;
pub use repository::*;
pub use task_handler::*;
