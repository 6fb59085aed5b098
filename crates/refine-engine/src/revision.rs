use tracing::{info, instrument, warn};

use refine_core::messages::Message;
use refine_core::survey::{ContentTree, SubsectionOutcome};

use crate::error::{EngineError, Result};
use crate::pipeline::Engine;
use crate::progress::{RefinementProgress, SubsectionStatus};
use crate::prompts::{content_feedback, grounding_feedback};

impl Engine {
    /// Turn the last failed review into feedback and continue the
    /// subsection's transcript with it. At the revision cap the subsection
    /// is escalated instead.
    #[instrument(skip_all, fields(
        section = progress.current_section_index,
        subsection = progress.current_subsection_index
    ))]
    pub(crate) async fn revise(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let status = progress.current_subsection_status;
        let Some(next_status) = status.after_revision() else {
            return Err(EngineError::InvariantViolation(format!("revise while {status}")));
        };
        let sub = tree.open_subsection_mut(s, k)?;

        let max = self.settings.max_revisions;
        if sub.revision_count >= max {
            warn!(revision_count = sub.revision_count, max, "revision limit reached; escalating");
            sub.outcome = Some(SubsectionOutcome::NeedsHumanReview);
            progress.current_subsection_status = SubsectionStatus::NeedsHumanReview;
            progress.current_review_status = format!("revision limit ({max}) reached");
            return Ok(());
        }

        let round = sub.last_review().ok_or_else(|| {
            EngineError::InvariantViolation(format!("revise {s}.{k} without a review"))
        })?;
        let feedback = match status {
            SubsectionStatus::ReadyForContentRevision => round
                .content
                .as_ref()
                .map(|review| content_feedback(review, self.settings.minimum_score)),
            _ => round
                .grounding
                .as_ref()
                .map(|review| grounding_feedback(review, &sub.papers)),
        }
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!("no review outcome to act on while {status}"))
        })?;

        let mut transcript = sub.transcript.clone();
        if transcript.is_empty() {
            transcript.push(Message::user_text(format!(
                "Current text of the subsection:\n\n{}",
                sub.content
            )));
            transcript.push(Message::assistant_text(sub.content.clone()));
        }
        transcript.push(Message::user_text(feedback));
        let text = self.generate(sub, &mut transcript).await?;

        sub.transcript = transcript;
        sub.apply_revision(text);
        progress.current_subsection_status = next_status;
        info!(revision_count = sub.revision_count, max, "subsection revised");
        Ok(())
    }
}
