//! Session-scoped cache of fetched documents.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use refine_core::collaborators::FetchedDocument;
use refine_core::ids::SessionId;
use refine_core::plan::PaperRef;

/// A fetched document together with the reference it was fetched for.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedDocument {
    pub paper: PaperRef,
    pub document: FetchedDocument,
}

/// Documents keyed by `(session, paper id)`. A document is fetched at most
/// once per session; later subsections citing it read it from here.
#[derive(Default)]
pub struct DocumentCache {
    entries: DashMap<(SessionId, String), Arc<CachedDocument>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &SessionId, paper_id: &str) -> Option<Arc<CachedDocument>> {
        self.entries
            .get(&(session_id.clone(), paper_id.to_string()))
            .map(|e| Arc::clone(e.value()))
    }

    /// Store a document. An existing entry wins, so concurrent saves of the
    /// same key all observe one value.
    pub fn save(&self, session_id: &SessionId, doc: CachedDocument) -> Arc<CachedDocument> {
        let key = (session_id.clone(), doc.paper.id.clone());
        Arc::clone(self.entries.entry(key).or_insert_with(|| Arc::new(doc)).value())
    }

    /// Drop every entry of a session. Returns how many were removed.
    pub fn cleanup(&self, session_id: &SessionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(session, _), _| session != session_id);
        let removed = before.saturating_sub(self.entries.len());
        debug!(session_id = %session_id, removed, "document cache cleaned");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
