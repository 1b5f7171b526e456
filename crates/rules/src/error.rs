use std::path::PathBuf;

use reactive_storage::StorageError;

use crate::definition::RuleKind;

/// Errors raised by rule lifecycle calls and by rule handlers during
/// mutation events.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule instance '{0}' already exists")]
    DuplicateId(String),

    #[error("rule instance '{0}' does not exist")]
    UnknownId(String),

    /// A configured collection or field is missing or has the wrong type.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Derived state disagrees with its source; the mutation is rejected.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{kind} rules do not support {operation}")]
    Unsupported {
        kind: RuleKind,
        operation: &'static str,
    },

    #[error("invalid rule declaration: {0}")]
    InvalidDeclaration(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("configuration encoding error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A rule error raised inside a mutation hook comes back from storage
/// wrapped in [`StorageError::HookAborted`]; unwrap it so callers see the
/// original error.
impl From<StorageError> for RuleError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::HookAborted { collection, source } => {
                match source.downcast::<RuleError>() {
                    Ok(rule_error) => *rule_error,
                    Err(source) => RuleError::Storage(StorageError::HookAborted { collection, source }),
                }
            }
            other => RuleError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

/// Outcome of loading a single declaration file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    Loaded { rule_id: String },
    /// Dotfile or non-YAML file.
    Skipped { reason: String },
    Failed { error: String },
}
