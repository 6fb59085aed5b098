//! Fixtures for engine tests: a fixed-text fetcher, small plans, canned
//! model responses and a fully wired engine over in-memory storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use refine_core::collaborators::{CollaboratorError, DocumentFetcher, FetchedDocument};
use refine_core::ids::SessionId;
use refine_core::plan::{KeyPoint, PaperRef, Plan, SectionPlan};
use refine_llm::{MockProvider, MockResponse};
use refine_retrieval::{ContextBuilder, DocumentCache, HashedEmbeddingService};
use refine_settings::{RefineSettings, RetrievalSettings};
use refine_store::{Database, SubsectionRepo, VectorRepo};

use crate::pipeline::{Engine, EngineDeps};

pub const PARSING: &str = "Parsing builds a syntax tree from a stream of tokens.\n\n\
    Recursive descent parsers mirror the grammar with one function per rule.\n\n\
    Error recovery lets a parser report several problems in one pass.";

pub const ALLOCATION: &str = "Register allocation assigns program variables to machine registers.\n\n\
    Graph colouring models interference between live ranges.\n\n\
    Spilling moves values to memory when registers run out.";

pub struct StaticFetcher {
    texts: HashMap<String, String>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        Self {
            texts: docs.iter().map(|(id, t)| (id.to_string(), t.to_string())).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, paper: &PaperRef) -> Result<FetchedDocument, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .get(&paper.id)
            .map(|text| FetchedDocument {
                text: text.clone(),
                authors: vec!["Grace Hopper".into()],
                year: Some(1952),
                abstract_text: String::new(),
            })
            .ok_or_else(|| CollaboratorError::NotFound(paper.id.clone()))
    }
}

pub fn paper(id: &str) -> PaperRef {
    PaperRef {
        id: id.into(),
        title: format!("Paper {id}"),
        year: Some(1952),
        url: String::new(),
        summary: String::new(),
        citation_reason: String::new(),
    }
}

fn plan(points: &[(&str, &str)]) -> Plan {
    Plan {
        sections: vec![SectionPlan {
            number: 1,
            title: "Compiler construction".into(),
            outline: "From source text to machine code".into(),
            key_points: points
                .iter()
                .map(|(text, paper_id)| KeyPoint {
                    text: text.to_string(),
                    papers: vec![paper(paper_id)],
                })
                .collect(),
        }],
        reasoning: String::new(),
    }
}

pub fn single_point_plan() -> Plan {
    plan(&[("Parsing builds syntax trees", "p1")])
}

pub fn two_point_plan() -> Plan {
    plan(&[
        ("Parsing builds syntax trees", "p1"),
        ("Register allocation maps variables to registers", "p2"),
    ])
}

pub fn shared_paper_plan() -> Plan {
    plan(&[
        ("Parsing builds syntax trees", "p1"),
        ("Parsers recover from errors", "p1"),
    ])
}

pub fn draft(text: &str) -> MockResponse {
    MockResponse::stream_text(text)
}

/// Content review with `(span, category)` issues.
pub fn content_verdict(score: u8, issues: &[(&str, &str)]) -> MockResponse {
    let issues: Vec<_> = issues
        .iter()
        .map(|(span, category)| {
            json!({
                "reviewed_text": span,
                "error_type": category,
                "explanation": format!("{category} problem"),
                "correction_suggestion": "Rewrite it"
            })
        })
        .collect();
    MockResponse::stream_json(&json!({
        "overall_assessment": {
            "score": score,
            "meets_minimum": score >= 7,
            "reasoning": "Assessment"
        },
        "fine_grained_results": issues
    }))
}

/// Extraction with `(citation, ids, claim)` entries.
pub fn extraction(claims: &[(&str, &[&str], &str)]) -> MockResponse {
    let claims: Vec<_> = claims
        .iter()
        .map(|(citation, ids, claim)| {
            json!({
                "citation": citation,
                "cited_papers": ids,
                "supported_claim": claim,
                "context": format!("{claim} {citation}.")
            })
        })
        .collect();
    MockResponse::stream_json(&json!({ "citation_claims": claims }))
}

pub fn verdict_valid() -> MockResponse {
    MockResponse::stream_json(&json!({
        "status": "valid",
        "error_type": null,
        "explanation": "Stated in the paper",
        "correction_suggestion": ""
    }))
}

pub fn verdict_invalid(error_type: &str) -> MockResponse {
    MockResponse::stream_json(&json!({
        "status": "invalid",
        "error_type": error_type,
        "explanation": "The paper says less than this",
        "correction_suggestion": "Narrow the claim"
    }))
}

pub struct Harness {
    pub engine: Engine,
    pub mock: Arc<MockProvider>,
    pub repo: Arc<SubsectionRepo>,
    pub vectors: Arc<VectorRepo>,
    pub fetcher: Arc<StaticFetcher>,
    pub cancel: CancellationToken,
}

/// Engine over in-memory storage with both test documents available.
pub fn harness(
    plan: Plan,
    responses: Vec<MockResponse>,
    configure: impl FnOnce(&mut RefineSettings),
) -> Harness {
    let mut settings = RefineSettings::default();
    settings.retrieval = RetrievalSettings {
        chunk_size: 120,
        chunk_overlap: 20,
        top_k: 3,
        ..RetrievalSettings::default()
    };
    settings.store.retain_vector_indices = false;
    configure(&mut settings);

    let db = Database::in_memory().unwrap();
    let fetcher = Arc::new(StaticFetcher::new(&[("p1", PARSING), ("p2", ALLOCATION)]));
    let vectors = Arc::new(VectorRepo::new(db.clone()));
    let context = ContextBuilder::new(
        &settings.retrieval,
        fetcher.clone(),
        Arc::new(HashedEmbeddingService::new(64)),
        vectors.clone(),
        Arc::new(DocumentCache::new()),
    )
    .unwrap();
    let repo = Arc::new(SubsectionRepo::new(db));
    let mock = Arc::new(MockProvider::new(responses));
    let cancel = CancellationToken::new();
    let engine = Engine::new(
        SessionId::from_raw("review_test"),
        Arc::new(plan),
        EngineDeps {
            provider: mock.clone(),
            context: Arc::new(context),
            store: repo.clone(),
        },
        &settings,
        cancel.clone(),
    );
    Harness {
        engine,
        mock,
        repo,
        vectors,
        fetcher,
        cancel,
    }
}
