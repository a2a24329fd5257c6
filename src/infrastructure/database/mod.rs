pub mod connection;
pub mod journal_repo;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use journal_repo::SqliteJournalStore;
