use flowai_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Bad input to an export or import call (unknown type tag, malformed
    /// uuid, a document with nothing to import).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
