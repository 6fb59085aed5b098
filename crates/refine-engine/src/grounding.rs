//! Citation grounding: extract the claims a subsection cites, then verify
//! every claim against its papers concurrently.
//!
//! Citations naming a paper outside the subsection are hallucinated. They
//! are never sent for verification; a claim citing only such papers becomes
//! an invalid `hallucination` result so it still shows up in the review and
//! the revision feedback. A claim mixing real and hallucinated ids is
//! verified against the real ones and lists the rest.

use std::collections::HashSet;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use refine_core::survey::{
    CitationClaim, ContentTree, GroundingCheckResult, GroundingErrorType, GroundingReview,
    GroundingStatus, PaperEvidence, Subsection, SubsectionOutcome,
};
use refine_llm::{parse_structured, JudgmentParseError};

use crate::error::Result;
use crate::pipeline::Engine;
use crate::progress::{RefinementProgress, SubsectionStatus};
use crate::prompts::{extraction_prompt, verification_prompt, REVIEWER_SYSTEM_PROMPT};

#[derive(Deserialize)]
struct ExtractionResponse {
    citation_claims: Vec<CitationClaim>,
}

#[derive(Deserialize)]
struct VerdictResponse {
    status: String,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    correction_suggestion: String,
}

/// A parsed verification judgment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub status: GroundingStatus,
    pub error_type: Option<GroundingErrorType>,
    pub explanation: String,
    pub correction_suggestion: String,
}

fn invalid(reason: impl Into<String>) -> JudgmentParseError {
    JudgmentParseError {
        reason: reason.into(),
    }
}

pub fn parse_extraction(raw: &str) -> std::result::Result<Vec<CitationClaim>, JudgmentParseError> {
    let response: ExtractionResponse = parse_structured(raw)?;
    Ok(response.citation_claims)
}

pub fn parse_verdict(raw: &str) -> std::result::Result<Verdict, JudgmentParseError> {
    let response: VerdictResponse = parse_structured(raw)?;
    let status = match response.status.trim().to_lowercase().as_str() {
        "valid" => GroundingStatus::Valid,
        "invalid" => GroundingStatus::Invalid,
        other => return Err(invalid(format!("unknown status '{other}'"))),
    };

    let error_type = match response.error_type.as_deref().map(str::trim) {
        None | Some("" | "null" | "none" | "None") => None,
        Some(raw_type) => {
            let normalised = raw_type.to_lowercase().replace(['-', ' '], "_");
            Some(
                serde_json::from_value::<GroundingErrorType>(Value::String(normalised))
                    .map_err(|_| invalid(format!("unknown error_type '{raw_type}'")))?,
            )
        }
    };
    let error_type = match status {
        GroundingStatus::Valid => None,
        GroundingStatus::Invalid => Some(error_type.unwrap_or(GroundingErrorType::Unsupported)),
    };

    Ok(Verdict {
        status,
        error_type,
        explanation: response.explanation,
        correction_suggestion: response.correction_suggestion,
    })
}

/// How one extracted claim is handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimCheck {
    /// Nothing to verify; already an invalid result.
    Hallucinated(GroundingCheckResult),
    Verify {
        claim: CitationClaim,
        paper_ids: Vec<String>,
        hallucinated_ids: Vec<String>,
    },
}

/// Split a claim's cited ids into allowed and hallucinated ones.
pub fn classify_claim(claim: &CitationClaim, allowed: &HashSet<&str>) -> ClaimCheck {
    let mut seen = HashSet::new();
    let (mut paper_ids, mut hallucinated_ids) = (Vec::new(), Vec::new());
    for id in claim.cited_papers.iter().map(|id| id.trim()) {
        if id.is_empty() || !seen.insert(id) {
            continue;
        }
        if allowed.contains(id) {
            paper_ids.push(id.to_string());
        } else {
            hallucinated_ids.push(id.to_string());
        }
    }

    if !paper_ids.is_empty() {
        return ClaimCheck::Verify {
            claim: claim.clone(),
            paper_ids,
            hallucinated_ids,
        };
    }

    let explanation = if hallucinated_ids.is_empty() {
        format!("Citation {} could not be matched to any paper of this subsection.", claim.citation)
    } else {
        format!(
            "Citation {} refers to {} which is not among the papers of this subsection.",
            claim.citation,
            hallucinated_ids.join(", ")
        )
    };
    ClaimCheck::Hallucinated(GroundingCheckResult {
        paper_ids: Vec::new(),
        citation: claim.citation.clone(),
        supported_claim: claim.supported_claim.clone(),
        status: GroundingStatus::Invalid,
        error_type: Some(GroundingErrorType::Hallucination),
        explanation,
        correction_suggestion: "Support the claim with one of the subsection's papers or remove \
                                the citation."
            .to_string(),
        hallucinated_ids,
    })
}

impl Engine {
    /// Extract claims, verify them all, and record the strict aggregate.
    #[instrument(skip_all, fields(
        section = progress.current_section_index,
        subsection = progress.current_subsection_index
    ))]
    pub(crate) async fn review_grounding(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let sub = tree.open_subsection_mut(s, k)?;

        let claims = self
            .conversation
            .judge(
                "citation extraction",
                REVIEWER_SYSTEM_PROMPT,
                extraction_prompt(&sub.content, &sub.papers),
                &[],
                0,
                self.settings.max_judgment_attempts,
                parse_extraction,
            )
            .await?;

        let checks: Vec<ClaimCheck> = {
            let allowed = sub.allowed_paper_ids();
            claims.iter().map(|c| classify_claim(c, &allowed)).collect()
        };
        for check in &checks {
            match check {
                ClaimCheck::Hallucinated(result) => {
                    warn!(citation = %result.citation, ids = ?result.hallucinated_ids, "hallucinated citation");
                }
                ClaimCheck::Verify { claim, hallucinated_ids, .. } if !hallucinated_ids.is_empty() => {
                    warn!(citation = %claim.citation, ids = ?hallucinated_ids, "citation names papers outside the subsection");
                }
                ClaimCheck::Verify { .. } => {}
            }
        }

        let verifying: &Subsection = sub;
        let results = join_all(checks.into_iter().map(|check| async move {
            match check {
                ClaimCheck::Hallucinated(result) => Ok(result),
                ClaimCheck::Verify {
                    claim,
                    paper_ids,
                    hallucinated_ids,
                } => self.verify_claim(verifying, claim, paper_ids, hallucinated_ids).await,
            }
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let review = GroundingReview::from_results(results);
        let passed = review.passed;
        let invalid = review.invalid_count();
        let total = review.results.len();
        info!(claims = total, invalid, passed, revision_count = sub.revision_count, "grounding reviewed");

        progress.current_review_status = if passed {
            format!("grounding review passed: {total} citations verified")
        } else {
            format!("grounding review failed: {invalid} of {total} citations invalid")
        };
        sub.citations = claims;
        sub.record_grounding_review(review);
        let next = SubsectionStatus::after_grounding_review(passed);
        if next == SubsectionStatus::Completed {
            sub.outcome = Some(SubsectionOutcome::Completed);
        }
        progress.current_subsection_status = next;
        Ok(())
    }

    async fn verify_claim(
        &self,
        sub: &Subsection,
        claim: CitationClaim,
        paper_ids: Vec<String>,
        hallucinated_ids: Vec<String>,
    ) -> Result<GroundingCheckResult> {
        let papers: Vec<&PaperEvidence> = paper_ids.iter().filter_map(|id| sub.paper(id)).collect();
        let tools = self.search_tools(paper_ids.clone());
        let verdict = self
            .conversation
            .judge(
                "verification",
                REVIEWER_SYSTEM_PROMPT,
                verification_prompt(&claim, &papers),
                &tools,
                self.settings.max_lookup_rounds,
                self.settings.max_judgment_attempts,
                parse_verdict,
            )
            .await?;
        debug!(citation = %claim.citation, status = ?verdict.status, "claim verified");

        Ok(GroundingCheckResult {
            paper_ids,
            citation: claim.citation,
            supported_claim: claim.supported_claim,
            status: verdict.status,
            error_type: verdict.error_type,
            explanation: verdict.explanation,
            correction_suggestion: verdict.correction_suggestion,
            hallucinated_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use refine_core::errors::GatewayError;
    use refine_llm::MockResponse;
    use serde_json::json;

    fn claim(ids: &[&str]) -> CitationClaim {
        CitationClaim {
            citation: "[Hopper_1952]".into(),
            cited_papers: ids.iter().map(|s| s.to_string()).collect(),
            supported_claim: "Compilers exist".into(),
            context: String::new(),
        }
    }

    fn allowed() -> HashSet<&'static str> {
        ["p1", "p2"].into_iter().collect()
    }

    #[test]
    fn allowed_claim_is_verified() {
        let check = classify_claim(&claim(&["p1", "p1", "p2"]), &allowed());
        assert_eq!(
            check,
            ClaimCheck::Verify {
                claim: claim(&["p1", "p1", "p2"]),
                paper_ids: vec!["p1".into(), "p2".into()],
                hallucinated_ids: vec![],
            }
        );
    }

    #[test]
    fn mixed_claim_keeps_allowed_ids() {
        let ClaimCheck::Verify { paper_ids, hallucinated_ids, .. } =
            classify_claim(&claim(&["ghost", "p2"]), &allowed())
        else {
            panic!("expected verification");
        };
        assert_eq!(paper_ids, vec!["p2".to_string()]);
        assert_eq!(hallucinated_ids, vec!["ghost".to_string()]);
    }

    #[test]
    fn fully_hallucinated_claim_is_invalid() {
        let ClaimCheck::Hallucinated(result) = classify_claim(&claim(&["ghost"]), &allowed()) else {
            panic!("expected hallucination");
        };
        assert_eq!(result.status, GroundingStatus::Invalid);
        assert_eq!(result.error_type, Some(GroundingErrorType::Hallucination));
        assert_eq!(result.hallucinated_ids, vec!["ghost".to_string()]);
        assert!(result.explanation.contains("ghost"));
    }

    #[test]
    fn claim_without_ids_does_not_disappear() {
        let ClaimCheck::Hallucinated(result) = classify_claim(&claim(&[]), &allowed()) else {
            panic!("expected hallucination");
        };
        assert!(result.hallucinated_ids.is_empty());
        assert!(result.explanation.contains("could not be matched"));
    }

    #[test]
    fn verdict_parsing() {
        let v = parse_verdict(r#"{"status": "Invalid", "error_type": "out-of-context"}"#).unwrap();
        assert_eq!(v.status, GroundingStatus::Invalid);
        assert_eq!(v.error_type, Some(GroundingErrorType::OutOfContext));

        let v = parse_verdict(r#"{"status": "invalid", "error_type": ""}"#).unwrap();
        assert_eq!(v.error_type, Some(GroundingErrorType::Unsupported));

        let v = parse_verdict(r#"{"status": "valid", "error_type": "overstatement"}"#).unwrap();
        assert_eq!(v.error_type, None);

        assert!(parse_verdict(r#"{"status": "maybe"}"#).is_err());
        assert!(parse_verdict(r#"{"status": "invalid", "error_type": "sarcasm"}"#).is_err());
    }

    #[test]
    fn extraction_requires_claim_list() {
        assert!(parse_extraction("{}").is_err());
        let claims = parse_extraction(
            r#"{"citation_claims": [{"citation": "[A_2020]", "cited_papers": ["p1"], "supported_claim": "c"}]}"#,
        )
        .unwrap();
        assert_eq!(claims.len(), 1);
        assert!(claims[0].context.is_empty());
    }

    async fn drafted(h: &Harness) -> (RefinementProgress, ContentTree) {
        let mut progress = h.engine.initial_progress();
        let mut tree = ContentTree::new();
        while progress.current_subsection_status != SubsectionStatus::ReadyForGroundingReview {
            (progress, tree) = h.engine.run_step(&progress, &tree).await.unwrap();
        }
        (progress, tree)
    }

    #[tokio::test]
    async fn zero_claims_pass_vacuously() {
        let h = harness(
            single_point_plan(),
            vec![draft("No citations here."), content_verdict(8, &[]), extraction(&[])],
            |_| {},
        );
        let (progress, tree) = drafted(&h).await;
        let (progress, tree) = h.engine.run_step(&progress, &tree).await.unwrap();
        assert_eq!(progress.current_subsection_status, SubsectionStatus::Completed);
        let sub = tree.subsection(0, 0).unwrap();
        assert!(sub.is_frozen());
        assert_eq!(sub.last_review().unwrap().grounding_passed(), Some(true));
    }

    #[tokio::test]
    async fn every_claim_is_verified_before_aggregating() {
        let h = harness(
            single_point_plan(),
            vec![
                draft("A [Hopper_1952]. B [Hopper_1952]. C [Hopper_1952]."),
                content_verdict(9, &[]),
                extraction(&[
                    ("[Hopper_1952]", &["p1"], "A"),
                    ("[Hopper_1952]", &["p1"], "B"),
                    ("[Hopper_1952]", &["p1"], "C"),
                ]),
                verdict_valid(),
                verdict_invalid("misrepresentation"),
                verdict_valid(),
            ],
            |_| {},
        );
        let (progress, tree) = drafted(&h).await;
        let (progress, tree) = h.engine.run_step(&progress, &tree).await.unwrap();

        assert_eq!(h.mock.call_count(), 6);
        let grounding = tree.subsection(0, 0).unwrap().last_review().unwrap().grounding.clone().unwrap();
        assert_eq!(grounding.results.len(), 3);
        assert_eq!(grounding.invalid_count(), 1);
        assert!(!grounding.passed);
        assert_eq!(progress.current_subsection_status, SubsectionStatus::ReadyForGroundingRevision);
    }

    #[tokio::test]
    async fn verification_failure_fails_the_step() {
        let h = harness(
            single_point_plan(),
            vec![
                draft("A [Hopper_1952]."),
                content_verdict(9, &[]),
                extraction(&[("[Hopper_1952]", &["p1"], "A")]),
                MockResponse::Error(GatewayError::ServerError {
                    status: 503,
                    body: "busy".into(),
                }),
            ],
            |_| {},
        );
        let (progress, tree) = drafted(&h).await;
        let err = h.engine.run_step(&progress, &tree).await.unwrap_err();
        assert!(err.is_transient());
        assert!(tree.subsection(0, 0).unwrap().last_review().unwrap().grounding.is_none());
    }

    #[tokio::test]
    async fn malformed_extraction_is_retried() {
        let h = harness(
            single_point_plan(),
            vec![
                draft("Plain."),
                content_verdict(9, &[]),
                MockResponse::stream_text("Here are the citations: none"),
                MockResponse::stream_json(&json!({"citation_claims": []})),
            ],
            |_| {},
        );
        let (progress, tree) = drafted(&h).await;
        let (progress, _) = h.engine.run_step(&progress, &tree).await.unwrap();
        assert_eq!(progress.current_subsection_status, SubsectionStatus::Completed);
        assert_eq!(h.mock.call_count(), 4);
    }
}
