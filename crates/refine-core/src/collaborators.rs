//! Contracts the engine requires of its external collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::plan::PaperRef;

#[derive(Clone, Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("invalid data: {0}")]
    Invalid(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Full text and metadata of a fetched document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
}

/// Resolves a document reference to its full text.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, paper: &PaperRef) -> Result<FetchedDocument, CollaboratorError>;
}

/// A finished subsection as handed to durable storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionRecord {
    pub session_id: SessionId,
    pub section_index: usize,
    pub subsection_index: usize,
    pub title: String,
    pub content: String,
}

/// Durable storage for finished subsections. `upsert` must be idempotent.
pub trait SubsectionStore: Send + Sync {
    fn upsert(&self, record: &SubsectionRecord) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CollaboratorError::Unavailable("503".into()).is_transient());
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CollaboratorError::NotFound("p1".into()).is_transient());
        assert!(!CollaboratorError::Invalid("empty".into()).is_transient());
    }

    #[test]
    fn fetched_document_reads_abstract_field() {
        let doc: FetchedDocument =
            serde_json::from_str(r#"{"text": "body", "abstract": "short", "year": 2020}"#).unwrap();
        assert_eq!(doc.abstract_text, "short");
        assert_eq!(doc.year, Some(2020));
        assert!(doc.authors.is_empty());
    }
}
