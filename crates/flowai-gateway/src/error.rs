use flowai_core::ProviderError;
use flowai_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown provider name, or a known kind with no adapter registered.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UnsupportedProvider(_) => "unsupported_provider",
            Self::Validation(_) => "validation",
            Self::Provider(e) => e.error_kind(),
            Self::Store(_) => "store",
        }
    }
}
