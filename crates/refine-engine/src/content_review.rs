//! Content quality review: request, response parsing and the stage step.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use refine_core::survey::{ContentCategory, ContentIssue, ContentReview, ContentTree};
use refine_llm::{parse_structured, JudgmentParseError};

use crate::error::Result;
use crate::pipeline::Engine;
use crate::progress::{RefinementProgress, SubsectionStatus};
use crate::prompts::{content_review_prompt, REVIEWER_SYSTEM_PROMPT};

#[derive(Deserialize)]
struct ReviewResponse {
    overall_assessment: OverallAssessment,
    #[serde(default)]
    fine_grained_results: Vec<FineGrainedResult>,
}

#[derive(Deserialize)]
struct OverallAssessment {
    score: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct FineGrainedResult {
    #[serde(default)]
    reviewed_text: String,
    error_type: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    correction_suggestion: String,
}

fn invalid(reason: impl Into<String>) -> JudgmentParseError {
    JudgmentParseError {
        reason: reason.into(),
    }
}

fn parse_category(raw: &str) -> std::result::Result<ContentCategory, JudgmentParseError> {
    serde_json::from_value(Value::String(raw.trim().to_lowercase()))
        .map_err(|_| invalid(format!("unknown error_type '{raw}'")))
}

/// Parse a content review. The pass flag is recomputed from the score;
/// the reviewer's own `meets_minimum` is ignored.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_content_review(
    raw: &str,
    minimum_score: u8,
) -> std::result::Result<ContentReview, JudgmentParseError> {
    let response: ReviewResponse = parse_structured(raw)?;
    let score = response.overall_assessment.score;
    if !score.is_finite() || !(1.0..=10.0).contains(&score) {
        return Err(invalid(format!("score {score} is outside 1-10")));
    }
    let score = score.round() as u8;

    let issues = response
        .fine_grained_results
        .into_iter()
        .map(|r| {
            Ok(ContentIssue {
                category: parse_category(&r.error_type)?,
                span: r.reviewed_text,
                explanation: r.explanation,
                suggestion: r.correction_suggestion,
            })
        })
        .collect::<std::result::Result<Vec<_>, JudgmentParseError>>()?;

    Ok(ContentReview {
        score,
        meets_minimum: score >= minimum_score,
        reasoning: response.overall_assessment.reasoning,
        issues,
    })
}

impl Engine {
    #[instrument(skip_all, fields(
        section = progress.current_section_index,
        subsection = progress.current_subsection_index
    ))]
    pub(crate) async fn review_content(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let sub = tree.open_subsection_mut(s, k)?;
        let minimum = self.settings.minimum_score;

        let review = self
            .conversation
            .judge(
                "content review",
                REVIEWER_SYSTEM_PROMPT,
                content_review_prompt(&sub.key_point, &sub.content),
                &[],
                0,
                self.settings.max_judgment_attempts,
                |raw| parse_content_review(raw, minimum),
            )
            .await?;

        let passed = review.meets_minimum;
        info!(
            score = review.score,
            minimum,
            passed,
            issues = review.issues.len(),
            revision_count = sub.revision_count,
            "content reviewed"
        );
        progress.current_review_status = format!(
            "content review {}: score {}/10",
            if passed { "passed" } else { "failed" },
            review.score
        );
        sub.record_content_review(review);
        progress.current_subsection_status = SubsectionStatus::after_content_review(passed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(score: Value, issues: Value) -> String {
        json!({
            "overall_assessment": {"score": score, "meets_minimum": true, "reasoning": "ok"},
            "fine_grained_results": issues
        })
        .to_string()
    }

    #[test]
    fn pass_flag_follows_score_not_reviewer() {
        let review = parse_content_review(&raw(json!(6), json!([])), 7).unwrap();
        assert_eq!(review.score, 6);
        assert!(!review.meets_minimum);
        let review = parse_content_review(&raw(json!(7), json!([])), 7).unwrap();
        assert!(review.meets_minimum);
    }

    #[test]
    fn issues_map_to_domain() {
        let issues = json!([{
            "reviewed_text": "very very good",
            "error_type": "Conciseness",
            "explanation": "repetition",
            "correction_suggestion": "drop one 'very'"
        }]);
        let review = parse_content_review(&raw(json!(5), issues), 7).unwrap();
        assert_eq!(review.issues.len(), 1);
        let issue = &review.issues[0];
        assert_eq!(issue.category, ContentCategory::Conciseness);
        assert_eq!(issue.span, "very very good");
        assert_eq!(issue.suggestion, "drop one 'very'");
    }

    #[test]
    fn fenced_response_is_accepted() {
        let fenced = format!("```json\n{}\n```", raw(json!(8.0), json!([])));
        assert_eq!(parse_content_review(&fenced, 7).unwrap().score, 8);
    }

    #[test]
    fn unknown_category_is_malformed() {
        let issues = json!([{"reviewed_text": "x", "error_type": "tone"}]);
        let err = parse_content_review(&raw(json!(5), issues), 7).unwrap_err();
        assert!(err.reason.contains("tone"));
    }

    #[test]
    fn out_of_range_score_is_malformed() {
        assert!(parse_content_review(&raw(json!(0), json!([])), 7).is_err());
        assert!(parse_content_review(&raw(json!(11), json!([])), 7).is_err());
        assert!(parse_content_review("{\"fine_grained_results\": []}", 7).is_err());
    }
}
