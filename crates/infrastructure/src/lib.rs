pub mod database;
pub mod memory_repository;
pub mod observability;

pub use database::*;
pub use memory_repository::InMemoryTaskRepository;
pub use observability::*;
