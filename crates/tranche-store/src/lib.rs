//! Durable trade store for tracked positions.
//!
//! One row per open symbol, written after every applied transition and
//! deleted when the position closes. Backends:
//! - [`PostgrestStore`]: Supabase table over PostgREST
//! - [`FileStore`]: local JSON file
//! - [`MemoryStore`]: volatile, for tests and dry runs

pub mod error;
pub mod file;
pub mod memory;
pub mod postgrest;
pub mod record;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgrest::{PostgrestConfig, PostgrestStore};
pub use record::TradeRecord;
pub use store::{BoxFuture, TradeStore};
