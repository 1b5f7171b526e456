pub mod collection;
pub mod database;
pub mod error;
pub mod hooks;
pub mod schema;
pub mod transaction;

pub use collection::{Collection, RowId};
pub use database::{Database, DEFAULT_MAX_HOOK_DEPTH};
pub use error::{StorageError, StorageResult};
pub use hooks::MutationObserver;
pub use schema::{CollectionSchema, FieldDef};
pub use transaction::Transaction;
