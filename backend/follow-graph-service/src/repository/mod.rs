mod memory_repository;
mod postgres_repository;
mod r#trait;

pub use memory_repository::InMemoryFollowStore;
pub use postgres_repository::PostgresFollowStore;
pub use r#trait::{EdgeChange, FollowGraphStore, ReconcileOutcome};
