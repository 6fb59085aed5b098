//! # refine-retrieval
//!
//! Evidence retrieval for subsection drafting and verification:
//! - recursive text chunking and embedding
//! - per-(session, document) vector collections in `refine-store`
//! - a session document cache so each document is fetched once
//! - the Context Builder that assembles [`PaperEvidence`] for a key point
//! - the `search_paper_fragments` tool used during generation
//!
//! [`PaperEvidence`]: refine_core::survey::PaperEvidence

#![deny(unsafe_code)]

pub mod builder;
pub mod cache;
pub mod chunker;
pub mod embeddings;
pub mod errors;
pub mod fetch;
pub mod html;
pub mod normalize;
pub mod retry;
pub mod search_tool;

pub use builder::ContextBuilder;
pub use cache::{CachedDocument, DocumentCache};
pub use chunker::RecursiveChunker;
pub use embeddings::{embedding_service, EmbeddingService, HashedEmbeddingService, OpenAiEmbeddingService};
pub use errors::RetrievalError;
pub use retry::RetryPolicy;
pub use fetch::{HttpDocumentFetcher, LocalDirectoryFetcher};
pub use search_tool::SearchPaperFragments;
