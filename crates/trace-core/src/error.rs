use thiserror::Error;

/// Failures raised by an [`EntityStore`](crate::store::EntityStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer already holds this block number.
    #[error("block {block_number} already exists")]
    Conflict { block_number: u64 },

    #[error("entity {entity_id} is immutable: {reason}")]
    Immutable { entity_id: String, reason: String },

    /// A product or batch code is already indexed for another entity.
    #[error("code {code} already belongs to {owner}")]
    DuplicateCode { code: String, owner: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("block {block_number} was appended concurrently")]
    ConcurrentAppendConflict { block_number: u64 },

    #[error("append for entity {entity_id} failed after {attempts} attempts")]
    AppendFailed { entity_id: String, attempts: u32 },

    #[error("no product or batch matches identifier {identifier}")]
    NotFound { identifier: String },

    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),

    #[error("invalid {transaction_type} payload: {reason}")]
    InvalidTransactionData {
        transaction_type: String,
        reason: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { block_number } => {
                LedgerError::ConcurrentAppendConflict { block_number }
            }
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::EntityNotFound { .. } => "EntityNotFound",
            LedgerError::ConcurrentAppendConflict { .. } => "ConcurrentAppendConflict",
            LedgerError::AppendFailed { .. } => "AppendFailed",
            LedgerError::NotFound { .. } => "NotFoundError",
            LedgerError::UnknownTransactionType(_) => "UnknownTransactionType",
            LedgerError::InvalidTransactionData { .. } => "InvalidTransactionData",
            LedgerError::Store(_) => "StoreError",
        }
    }

    /// The id the error is about, if any.
    pub fn offending_id(&self) -> Option<String> {
        match self {
            LedgerError::EntityNotFound { entity_id }
            | LedgerError::AppendFailed { entity_id, .. } => Some(entity_id.clone()),
            LedgerError::ConcurrentAppendConflict { block_number } => {
                Some(block_number.to_string())
            }
            LedgerError::NotFound { identifier } => Some(identifier.clone()),
            LedgerError::UnknownTransactionType(t)
            | LedgerError::InvalidTransactionData {
                transaction_type: t,
                ..
            } => Some(t.clone()),
            LedgerError::Store(StoreError::Immutable { entity_id, .. }) => Some(entity_id.clone()),
            LedgerError::Store(StoreError::DuplicateCode { code, .. }) => Some(code.clone()),
            LedgerError::Store(_) => None,
        }
    }
}
