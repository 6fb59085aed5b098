use refine_core::collaborators::CollaboratorError;
use refine_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("document fetch failed: {0}")]
    Fetch(#[from] CollaboratorError),

    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The embedding endpoint refused the request or answered nonsense;
    /// sending it again will not help.
    #[error("embedding rejected: {0}")]
    EmbeddingRejected(String),

    #[error("vector store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("document {0} has no text")]
    EmptyDocument(String),
}

impl RetrievalError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::Embedding(_) => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
