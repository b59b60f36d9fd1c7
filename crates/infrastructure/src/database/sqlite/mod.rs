pub mod sqlite_task_repository;

pub use sqlite_task_repository::SqliteTaskRepository;
