//! Storage backends for the confirmation repository.

pub mod init;
pub mod memory;
pub mod sqlite;

pub use init::{create_schema, init_database};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
