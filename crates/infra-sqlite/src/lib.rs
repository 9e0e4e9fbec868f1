// LinkWard Infrastructure - SQLite Adapter
// Implements: DurableStore over a single kv_store table

mod connection;
mod durable_store;
mod migration;

pub use connection::create_pool;
pub use durable_store::SqliteDurableStore;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for
// StoreError here)
