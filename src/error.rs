//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Recoverable conditions are returned from every API call. API misuse
/// (double `skip`, `match_fn` on the key pseudo-field, and friends) is a
/// bug in the caller and panics instead; see the `query` module docs.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,

    /// Insert collided with an existing record key.
    #[error("key already exists")]
    KeyExists,

    /// A unique index already holds this field value for another record.
    #[error("unique constraint violation on index {0}")]
    UniqueExists(String),

    /// A query value cannot be compared with the stored field value.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A query names a field the record type does not have.
    #[error("field {0} does not exist on the stored type")]
    BadField(String),

    /// `index()` names an index the schema does not declare.
    #[error("index {0} is not declared on the stored type")]
    BadIndex(String),

    /// A write was attempted in a read-only transaction.
    #[error("cannot write in a read-only transaction")]
    ReadOnlyTxn,

    /// Encoding or decoding a record, key, or index value failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Unclassified failure in the underlying key-value engine.
    #[error("engine error: {0}")]
    Engine(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Engine(err.to_string())
    }
}
