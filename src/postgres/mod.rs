// ABOUTME: PostgreSQL backend module
// ABOUTME: Exports connection management and the PostgreSQL storage adapter

pub mod connection;
pub mod storage;

pub use connection::{connect, connect_with_retry};
pub use storage::PostgresStorage;
