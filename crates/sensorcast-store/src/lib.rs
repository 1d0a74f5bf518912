//! Reading persistence: SQLite schema, the synchronous repository and the
//! async [`ReadingStore`] seam the live core depends on.

pub mod adapter;
pub mod database;
pub mod error;
pub mod readings;
pub mod schema;

pub use adapter::{InsertFeed, ReadingStore, SqliteReadingStore};
pub use database::Database;
pub use error::StoreError;
pub use readings::ReadingRepo;
