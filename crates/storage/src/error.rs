use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("invalid schema for '{collection}': {reason}")]
    InvalidSchema { collection: String, reason: String },

    #[error("constraint violation on '{collection}': {reason}")]
    ConstraintViolation { collection: String, reason: String },

    #[error("mutation hook aborted on '{collection}': {source}")]
    HookAborted {
        collection: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("hook depth exceeded: {depth} > {max_depth} (possible hook recursion)")]
    HookDepthExceeded { depth: u32, max_depth: u32 },

    #[error("transaction aborted; roll back before issuing further statements")]
    TransactionAborted,

    #[error("core error: {0}")]
    Core(#[from] reactive_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
