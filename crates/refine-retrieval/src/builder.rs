//! The Context Builder: per-key-point evidence assembly.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use refine_core::collaborators::{CollaboratorError, DocumentFetcher};
use refine_core::ids::SessionId;
use refine_core::plan::{KeyPoint, PaperRef};
use refine_core::survey::{PaperEvidence, ScoredSegment};
use refine_settings::RetrievalSettings;
use refine_store::{EmbeddedChunk, ScoredChunk, VectorRepo};

use crate::cache::{CachedDocument, DocumentCache};
use crate::chunker::RecursiveChunker;
use crate::embeddings::EmbeddingService;
use crate::errors::{Result, RetrievalError};
use crate::retry::RetryPolicy;

/// Builds [`PaperEvidence`] for every document of a key point.
///
/// Documents are processed concurrently. Each document is fetched and
/// embedded at most once per session: the text lives in the
/// [`DocumentCache`], the embeddings in a vector collection keyed by
/// `(session, paper id)`. Transient fetch and embedding failures are retried
/// under the [`RetryPolicy`]. A document that still cannot be fetched or
/// embedded gets an evidence entry with no segments and its error recorded;
/// it never fails the whole build.
pub struct ContextBuilder {
    fetcher: Arc<dyn DocumentFetcher>,
    embedder: Arc<dyn EmbeddingService>,
    vectors: Arc<VectorRepo>,
    cache: Arc<DocumentCache>,
    chunker: RecursiveChunker,
    top_k: usize,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

impl ContextBuilder {
    pub fn new(
        settings: &RetrievalSettings,
        fetcher: Arc<dyn DocumentFetcher>,
        embedder: Arc<dyn EmbeddingService>,
        vectors: Arc<VectorRepo>,
        cache: Arc<DocumentCache>,
    ) -> Result<Self> {
        if settings.top_k == 0 {
            return Err(RetrievalError::InvalidConfig("top_k must be positive".into()));
        }
        Ok(Self {
            fetcher,
            embedder,
            vectors,
            cache,
            chunker: RecursiveChunker::new(settings.chunk_size, settings.chunk_overlap)?,
            top_k: settings.top_k,
            fetch_timeout: Duration::from_secs(settings.fetch_timeout_secs.max(1)),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Evidence for each paper of `key_point`, in plan order.
    #[instrument(skip_all, fields(session_id = %session_id, papers = key_point.papers.len()))]
    pub async fn build(&self, session_id: &SessionId, key_point: &KeyPoint) -> Vec<PaperEvidence> {
        let query = match self.embed_query(&key_point.text).await {
            Ok(q) => Some(q),
            Err(e) => {
                warn!(error = %e, "query embedding failed; all documents fall back to no segments");
                None
            }
        };

        let query = query.as_deref();
        let evidence = join_all(key_point.papers.iter().map(|paper| async move {
            match self.build_one(session_id, paper, query).await {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(doc_id = %paper.id, error = %e, "evidence unavailable for document");
                    unavailable(paper, e.to_string())
                }
            }
        }))
        .await;

        let available = evidence.iter().filter(|e| e.is_available()).count();
        info!(available, total = evidence.len(), "context prepared");
        evidence
    }

    async fn build_one(
        &self,
        session_id: &SessionId,
        paper: &PaperRef,
        query: Option<&[f32]>,
    ) -> Result<PaperEvidence> {
        let doc = self.ensure_document(session_id, paper).await?;
        self.ensure_collection(session_id, &doc).await?;

        let query = query.ok_or_else(|| RetrievalError::Embedding("no query embedding".into()))?;
        let hits = self.vectors.search(session_id, &paper.id, query, self.top_k)?;
        debug!(doc_id = %paper.id, hits = hits.len(), "segments retrieved");

        let authors = if doc.document.authors.is_empty() {
            vec!["Unknown".to_string()]
        } else {
            doc.document.authors.clone()
        };
        let year = paper.year.or(doc.document.year);
        Ok(PaperEvidence {
            id: paper.id.clone(),
            title: paper.title.clone(),
            authors,
            year,
            url: paper.url.clone(),
            citation: PaperEvidence::citation_for(&paper.title, year),
            full_text: doc.document.text.clone(),
            segments: hits
                .into_iter()
                .map(|h| ScoredSegment {
                    text: h.text,
                    distance: h.distance,
                })
                .collect(),
            retrieval_error: None,
        })
    }

    /// The cached document, fetching it on first use in this session.
    async fn ensure_document(
        &self,
        session_id: &SessionId,
        paper: &PaperRef,
    ) -> Result<Arc<CachedDocument>> {
        if let Some(doc) = self.cache.get(session_id, &paper.id) {
            debug!(doc_id = %paper.id, "document cache hit");
            return Ok(doc);
        }
        let document = self
            .retry
            .run("fetch", &paper.id, || async move {
                let fetched = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(paper))
                    .await
                    .map_err(|_| CollaboratorError::Timeout(self.fetch_timeout))??;
                Ok::<_, RetrievalError>(fetched)
            })
            .await?;
        Ok(self.cache.save(
            session_id,
            CachedDocument {
                paper: paper.clone(),
                document,
            },
        ))
    }

    async fn ensure_collection(&self, session_id: &SessionId, doc: &CachedDocument) -> Result<()> {
        let paper_id = doc.paper.id.as_str();
        if self.vectors.exists(session_id, paper_id)? {
            return Ok(());
        }

        let chunks = self.chunker.split(&doc.document.text);
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyDocument(paper_id.to_string()));
        }
        let texts = chunks.as_slice();
        let embeddings = self
            .retry
            .run("embed", paper_id, || self.embedder.embed(texts))
            .await?;
        if embeddings.len() != chunks.len() {
            return Err(RetrievalError::EmbeddingRejected(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let (info, created) = self.vectors.get_or_create(session_id, paper_id, || {
            Ok(chunks
                .into_iter()
                .zip(embeddings)
                .map(|(text, embedding)| EmbeddedChunk { text, embedding })
                .collect())
        })?;
        debug!(doc_id = paper_id, chunks = info.chunk_count, created, "vector collection ready");
        Ok(())
    }

    /// Nearest chunks of one document's collection for a free-text query.
    pub async fn search(
        &self,
        session_id: &SessionId,
        paper_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let q = self.embed_query(query).await?;
        Ok(self.vectors.search(session_id, paper_id, &q, top_k)?)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.retry
            .run("embed", "query", || self.embedder.embed_single(text))
            .await
    }

    /// Drop the session's cached documents and, unless `retain_vectors`,
    /// its vector collections.
    pub fn release_session(&self, session_id: &SessionId, retain_vectors: bool) -> Result<()> {
        let documents = self.cache.cleanup(session_id);
        let collections = if retain_vectors {
            0
        } else {
            self.vectors.delete_session_collections(session_id)?
        };
        info!(session_id = %session_id, documents, collections, retain_vectors, "session resources released");
        Ok(())
    }
}

fn unavailable(paper: &PaperRef, error: String) -> PaperEvidence {
    PaperEvidence {
        id: paper.id.clone(),
        title: paper.title.clone(),
        authors: vec!["Unknown".to_string()],
        year: paper.year,
        url: paper.url.clone(),
        citation: PaperEvidence::citation_for(&paper.title, paper.year),
        full_text: String::new(),
        segments: Vec::new(),
        retrieval_error: Some(error),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::Ordering;

    use refine_core::survey::NO_SEGMENTS_FOUND;
    use refine_store::Database;

    fn key_point(text: &str, ids: &[&str]) -> KeyPoint {
        KeyPoint {
            text: text.into(),
            papers: ids.iter().map(|id| paper(id)).collect(),
        }
    }

    #[tokio::test]
    async fn builds_ranked_segments() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS)]));
        let builder = builder(fetcher, Database::in_memory().unwrap());

        let evidence = builder
            .build(&SessionId::new(), &key_point("register allocation", &["p1"]))
            .await;
        assert_eq!(evidence.len(), 1);
        let ev = &evidence[0];
        assert!(ev.is_available());
        assert!(ev.segments.len() <= 3);
        assert!(ev.segments.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(ev.segments[0].text.contains("Register allocation"));
        assert_eq!(ev.citation, "(Paper p1, 2020)");
        assert_eq!(ev.authors, vec!["Grace Hopper"]);
        assert!(ev.formatted_segments()[0].starts_with("[Score: "));
    }

    #[tokio::test]
    async fn failed_document_gets_sentinel() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS)]));
        let builder = builder(fetcher, Database::in_memory().unwrap());

        let evidence = builder
            .build(&SessionId::new(), &key_point("parsing", &["p1", "missing"]))
            .await;
        assert_eq!(evidence.len(), 2);
        assert!(evidence[0].is_available());
        assert_eq!(evidence[1].id, "missing");
        assert!(!evidence[1].is_available());
        assert!(evidence[1].retrieval_error.is_some());
        assert_eq!(evidence[1].formatted_segments(), vec![NO_SEGMENTS_FOUND.to_string()]);
        assert_eq!(evidence[1].authors, vec!["Unknown"]);
    }

    #[tokio::test]
    async fn documents_are_fetched_once_per_session() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS), ("p2", COMPILERS)]));
        let db = Database::in_memory().unwrap();
        let builder = builder(Arc::clone(&fetcher), db.clone());
        let session = SessionId::new();

        builder.build(&session, &key_point("parsing", &["p1", "p2"])).await;
        builder.build(&session, &key_point("optimisation", &["p1"])).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(VectorRepo::new(db).list_collections(&session).unwrap().len(), 2);

        builder.build(&SessionId::new(), &key_point("parsing", &["p1"])).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn each_document_is_embedded_once_per_session() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS), ("p2", COMPILERS)]));
        let embedder = Arc::new(CountingEmbedder::new());
        let builder = builder_with(fetcher, embedder.clone(), Database::in_memory().unwrap());
        let session = SessionId::new();

        builder.build(&session, &key_point("parsing", &["p1", "p2"])).await;
        builder.build(&session, &key_point("register allocation", &["p1", "p2"])).await;
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.queries.load(Ordering::SeqCst), 2);

        builder.build(&SessionId::new(), &key_point("parsing", &["p1"])).await;
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn brief_outage_is_retried() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS)]).with_outages(1));
        let builder = builder(Arc::clone(&fetcher), Database::in_memory().unwrap());

        let evidence = builder.build(&SessionId::new(), &key_point("parsing", &["p1"])).await;
        assert_eq!(fetcher.calls(), 2);
        assert!(evidence[0].is_available());
        assert!(evidence[0].retrieval_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sentinel_only_after_retries_run_out() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS)]).with_outages(usize::MAX));
        let builder = builder(Arc::clone(&fetcher), Database::in_memory().unwrap());
        let policy = RetryPolicy::default();

        let evidence = builder.build(&SessionId::new(), &key_point("parsing", &["p1"])).await;
        assert_eq!(fetcher.calls(), policy.max_retries as usize + 1);
        assert!(!evidence[0].is_available());
        assert!(evidence[0].retrieval_error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn missing_documents_are_not_retried() {
        let fetcher = Arc::new(FakeFetcher::new(&[]));
        let builder = builder(Arc::clone(&fetcher), Database::in_memory().unwrap());
        builder.build(&SessionId::new(), &key_point("parsing", &["absent"])).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn empty_document_is_isolated() {
        let fetcher = Arc::new(FakeFetcher::new(&[("blank", "   \n\n  ")]));
        let builder = builder(fetcher, Database::in_memory().unwrap());
        let evidence = builder.build(&SessionId::new(), &key_point("x", &["blank"])).await;
        assert!(!evidence[0].is_available());
    }

    #[tokio::test]
    async fn release_session_respects_retention() {
        let fetcher = Arc::new(FakeFetcher::new(&[("p1", COMPILERS)]));
        let db = Database::in_memory().unwrap();
        let builder = builder(Arc::clone(&fetcher), db.clone());
        let repo = VectorRepo::new(db);

        let kept = SessionId::new();
        builder.build(&kept, &key_point("parsing", &["p1"])).await;
        builder.release_session(&kept, true).unwrap();
        assert!(repo.exists(&kept, "p1").unwrap());

        let dropped = SessionId::new();
        builder.build(&dropped, &key_point("parsing", &["p1"])).await;
        builder.release_session(&dropped, false).unwrap();
        assert!(!repo.exists(&dropped, "p1").unwrap());
        assert!(repo.exists(&kept, "p1").unwrap());

        // the cache was cleared, so the next build fetches again
        let before = fetcher.calls();
        builder.build(&kept, &key_point("parsing", &["p1"])).await;
        assert_eq!(fetcher.calls(), before + 1);
    }
}
