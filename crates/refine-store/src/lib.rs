pub mod database;
pub mod error;
pub mod schema;
pub mod subsections;
pub mod vectors;

pub use database::Database;
pub use error::StoreError;
pub use subsections::{StoredSubsection, SubsectionRepo};
pub use vectors::{CollectionInfo, EmbeddedChunk, ScoredChunk, VectorRepo};
