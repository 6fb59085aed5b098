//! The content tree the engine fills in: sections, their subsections, the
//! evidence bound to each subsection and the review rounds it went through.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::Message;

/// Segment text used when a document produced no usable evidence.
pub const NO_SEGMENTS_FOUND: &str = "No relevant segments found";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SurveyError {
    #[error("subsection {section}.{subsection} is frozen")]
    Frozen { section: usize, subsection: usize },
    #[error("section {expected} must be created before section {got}")]
    SectionOutOfOrder { expected: usize, got: usize },
    #[error("subsection {expected} must be created before subsection {got} in section {section}")]
    SubsectionOutOfOrder {
        section: usize,
        expected: usize,
        got: usize,
    },
    #[error("section {0} does not exist")]
    MissingSection(usize),
    #[error("subsection {section}.{subsection} does not exist")]
    MissingSubsection { section: usize, subsection: usize },
}

// ── Evidence ────────────────────────────────────────────────────────────────

/// A retrieved text segment with its distance to the query (lower is closer).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredSegment {
    pub text: String,
    pub distance: f32,
}

impl ScoredSegment {
    pub fn formatted(&self) -> String {
        format!("[Score: {:.3}] {}", self.distance, self.text)
    }
}

/// Evidence for one document, computed once per (session, document).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperEvidence {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<u32>,
    pub url: String,
    pub citation: String,
    pub full_text: String,
    pub segments: Vec<ScoredSegment>,
    /// Set when fetching or embedding failed for this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_error: Option<String>,
}

impl PaperEvidence {
    /// `(title, year)` as used in the drafting prompt.
    pub fn citation_for(title: &str, year: Option<u32>) -> String {
        match year {
            Some(y) => format!("({title}, {y})"),
            None => format!("({title}, n.d.)"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.retrieval_error.is_none() && !self.segments.is_empty()
    }

    /// Segments as prompt lines, or the single sentinel line when none exist.
    pub fn formatted_segments(&self) -> Vec<String> {
        if self.segments.is_empty() {
            return vec![NO_SEGMENTS_FOUND.to_string()];
        }
        self.segments.iter().map(ScoredSegment::formatted).collect()
    }

    /// Author last names: the part before a comma when present, otherwise the
    /// final whitespace-separated token. `Unknown` entries are dropped.
    pub fn author_last_names(&self) -> Vec<String> {
        self.authors
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty() && *a != "Unknown")
            .map(|a| match a.split_once(',') {
                Some((last, _)) => last.trim().to_string(),
                None => a.split_whitespace().last().unwrap_or(a).to_string(),
            })
            .collect()
    }
}

// ── Content review ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Clarity,
    Conciseness,
    Flow,
    Grammar,
    Vagueness,
    Style,
    Accuracy,
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clarity => "clarity",
            Self::Conciseness => "conciseness",
            Self::Flow => "flow",
            Self::Grammar => "grammar",
            Self::Vagueness => "vagueness",
            Self::Style => "style",
            Self::Accuracy => "accuracy",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIssue {
    pub span: String,
    pub category: ContentCategory,
    pub explanation: String,
    pub suggestion: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReview {
    pub score: u8,
    pub meets_minimum: bool,
    pub reasoning: String,
    pub issues: Vec<ContentIssue>,
}

// ── Grounding review ────────────────────────────────────────────────────────

/// A citation found in subsection prose. Not authoritative until verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationClaim {
    pub citation: String,
    pub cited_papers: Vec<String>,
    pub supported_claim: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingStatus {
    Valid,
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingErrorType {
    Misrepresentation,
    Hallucination,
    Overstatement,
    #[serde(alias = "out-of-context")]
    OutOfContext,
    Unsupported,
}

impl fmt::Display for GroundingErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Misrepresentation => "misrepresentation",
            Self::Hallucination => "hallucination",
            Self::Overstatement => "overstatement",
            Self::OutOfContext => "out_of_context",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingCheckResult {
    pub paper_ids: Vec<String>,
    pub citation: String,
    pub supported_claim: String,
    pub status: GroundingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<GroundingErrorType>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub correction_suggestion: String,
    /// Cited ids that are not in the subsection's paper list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hallucinated_ids: Vec<String>,
}

impl GroundingCheckResult {
    pub fn is_invalid(&self) -> bool {
        self.status == GroundingStatus::Invalid
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingReview {
    pub results: Vec<GroundingCheckResult>,
    pub passed: bool,
}

impl GroundingReview {
    /// Strict aggregate: one invalid verdict fails the review. No results
    /// is a pass.
    pub fn from_results(results: Vec<GroundingCheckResult>) -> Self {
        let passed = !results.iter().any(GroundingCheckResult::is_invalid);
        Self { results, passed }
    }

    pub fn invalid_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_invalid()).count()
    }
}

/// One snapshot per revision attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRound {
    /// The subsection's `revision_count` when the round was opened.
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentReview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingReview>,
}

impl ReviewRound {
    pub fn content_passed(&self) -> Option<bool> {
        self.content.as_ref().map(|c| c.meets_minimum)
    }

    pub fn grounding_passed(&self) -> Option<bool> {
        self.grounding.as_ref().map(|g| g.passed)
    }
}

// ── Tree ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsectionOutcome {
    Completed,
    NeedsHumanReview,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subsection {
    pub index: usize,
    pub title: String,
    pub key_point: String,
    pub papers: Vec<PaperEvidence>,
    pub content: String,
    pub revision_count: u32,
    pub review_history: Vec<ReviewRound>,
    /// Append-only generation log; a revision continues it.
    pub transcript: Vec<Message>,
    #[serde(default)]
    pub citations: Vec<CitationClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SubsectionOutcome>,
}

impl Subsection {
    pub fn new(index: usize, key_point: impl Into<String>, papers: Vec<PaperEvidence>) -> Self {
        let key_point = key_point.into();
        Self {
            index,
            title: key_point.clone(),
            key_point,
            papers,
            content: String::new(),
            revision_count: 0,
            review_history: Vec::new(),
            transcript: Vec::new(),
            citations: Vec::new(),
            outcome: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn allowed_paper_ids(&self) -> HashSet<&str> {
        self.papers.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn paper(&self, id: &str) -> Option<&PaperEvidence> {
        self.papers.iter().find(|p| p.id == id)
    }

    pub fn last_review(&self) -> Option<&ReviewRound> {
        self.review_history.last()
    }

    /// Open a new review round holding a content review.
    pub fn record_content_review(&mut self, review: ContentReview) {
        self.review_history.push(ReviewRound {
            revision: self.revision_count,
            content: Some(review),
            grounding: None,
        });
    }

    /// Merge a grounding review into the current round. The current round is
    /// the last one if it belongs to this revision and has no grounding
    /// outcome yet; otherwise a new round is opened.
    pub fn record_grounding_review(&mut self, review: GroundingReview) {
        let revision = self.revision_count;
        match self.review_history.last_mut() {
            Some(round) if round.revision == revision && round.grounding.is_none() => {
                round.grounding = Some(review);
            }
            _ => self.review_history.push(ReviewRound {
                revision,
                content: None,
                grounding: Some(review),
            }),
        }
    }

    /// Replace the content after a revision and bump the counter.
    pub fn apply_revision(&mut self, content: String) {
        self.content = content;
        self.revision_count += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub title: String,
    pub outline: String,
    #[serde(default)]
    pub introduction: String,
    /// Dense: subsection `i` lives at position `i`.
    pub subsections: Vec<Subsection>,
}

impl Section {
    pub fn new(index: usize, title: impl Into<String>, outline: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            outline: outline.into(),
            introduction: String::new(),
            subsections: Vec::new(),
        }
    }

    /// Insert a freshly prepared subsection. Re-preparing the current one
    /// replaces it unless it is frozen; skipping ahead is rejected.
    pub fn place_subsection(&mut self, subsection: Subsection) -> Result<(), SurveyError> {
        let idx = subsection.index;
        let len = self.subsections.len();
        if idx == len {
            self.subsections.push(subsection);
            return Ok(());
        }
        match self.subsections.get_mut(idx) {
            Some(existing) if existing.is_frozen() => Err(SurveyError::Frozen {
                section: self.index,
                subsection: idx,
            }),
            Some(existing) => {
                *existing = subsection;
                Ok(())
            }
            None => Err(SurveyError::SubsectionOutOfOrder {
                section: self.index,
                expected: len,
                got: idx,
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentTree {
    pub sections: Vec<Section>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return section `index`, creating it when it is the next one.
    pub fn ensure_section(
        &mut self,
        index: usize,
        title: &str,
        outline: &str,
    ) -> Result<&mut Section, SurveyError> {
        let len = self.sections.len();
        if index == len {
            self.sections.push(Section::new(index, title, outline));
        } else if index > len {
            return Err(SurveyError::SectionOutOfOrder {
                expected: len,
                got: index,
            });
        }
        self.sections
            .get_mut(index)
            .ok_or(SurveyError::MissingSection(index))
    }

    pub fn subsection(&self, section: usize, subsection: usize) -> Result<&Subsection, SurveyError> {
        self.sections
            .get(section)
            .ok_or(SurveyError::MissingSection(section))?
            .subsections
            .get(subsection)
            .ok_or(SurveyError::MissingSubsection { section, subsection })
    }

    /// Mutable access to a subsection that is still open for edits.
    pub fn open_subsection_mut(
        &mut self,
        section: usize,
        subsection: usize,
    ) -> Result<&mut Subsection, SurveyError> {
        let sub = self
            .sections
            .get_mut(section)
            .ok_or(SurveyError::MissingSection(section))?
            .subsections
            .get_mut(subsection)
            .ok_or(SurveyError::MissingSubsection { section, subsection })?;
        if sub.is_frozen() {
            return Err(SurveyError::Frozen { section, subsection });
        }
        Ok(sub)
    }

    pub fn subsection_count(&self) -> usize {
        self.sections.iter().map(|s| s.subsections.len()).sum()
    }

    pub fn total_revisions(&self) -> u64 {
        self.sections
            .iter()
            .flat_map(|s| s.subsections.iter())
            .map(|sub| u64::from(sub.revision_count))
            .sum()
    }
}
