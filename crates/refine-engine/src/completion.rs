//! Finishing subsections and closing a session.

use serde::Serialize;
use tracing::{info, instrument, warn};

use refine_core::collaborators::SubsectionRecord;
use refine_core::ids::SessionId;
use refine_core::survey::{ContentTree, SubsectionOutcome};

use crate::error::{EngineError, Result};
use crate::pipeline::Engine;
use crate::progress::{Action, RefinementProgress};

/// What a finished session produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub session_id: SessionId,
    /// Sections the plan has moved past, escalations included.
    pub sections_completed: usize,
    /// Subsections that passed both reviews. Escalated ones are not counted.
    pub subsections_completed: usize,
    pub total_revisions: u64,
    /// `(section, subsection)` pairs left for a human.
    pub escalated: Vec<(usize, usize)>,
}

impl RunSummary {
    pub fn from_state(session_id: SessionId, progress: &RefinementProgress, tree: &ContentTree) -> Self {
        let mut subsections_completed = 0;
        let mut escalated = Vec::new();
        for section in &tree.sections {
            for sub in &section.subsections {
                match sub.outcome {
                    Some(SubsectionOutcome::Completed) => subsections_completed += 1,
                    Some(SubsectionOutcome::NeedsHumanReview) => {
                        escalated.push((section.index, sub.index));
                    }
                    None => {}
                }
            }
        }
        Self {
            session_id,
            sections_completed: progress.completed_sections.len(),
            subsections_completed,
            total_revisions: tree.total_revisions(),
            escalated,
        }
    }
}

impl Engine {
    /// Persist the current subsection and move to the next one.
    pub(crate) fn finish_subsection(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
        action: Action,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let sub = tree
            .sections
            .get_mut(s)
            .and_then(|section| section.subsections.get_mut(k))
            .ok_or_else(|| EngineError::InvariantViolation(format!("finish {s}.{k} before it exists")))?;

        let outcome = match action {
            Action::Escalate => SubsectionOutcome::NeedsHumanReview,
            _ => SubsectionOutcome::Completed,
        };
        let outcome = *sub.outcome.get_or_insert(outcome);

        self.store.upsert(&SubsectionRecord {
            session_id: self.session_id.clone(),
            section_index: s,
            subsection_index: k,
            title: sub.title.clone(),
            content: sub.content.clone(),
        })?;

        match outcome {
            SubsectionOutcome::Completed => {
                info!(section = s, subsection = k, revisions = sub.revision_count, "subsection completed");
            }
            SubsectionOutcome::NeedsHumanReview => {
                warn!(
                    section = s,
                    subsection = k,
                    revisions = sub.revision_count,
                    "subsection needs human review"
                );
            }
        }
        progress.advance()
    }

    /// Close the session once every key point is finished. Releases the
    /// session's documents and, unless configured to keep them, its vector
    /// indices.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn complete(
        &self,
        progress: &RefinementProgress,
        tree: &ContentTree,
    ) -> Result<RunSummary> {
        if !progress.is_complete() {
            return Err(EngineError::InvariantViolation(format!(
                "complete called at {}",
                progress.position()
            )));
        }
        self.context
            .release_session(&self.session_id, self.retain_vector_indices)?;

        let summary = RunSummary::from_state(self.session_id.clone(), progress, tree);
        info!(
            sections = summary.sections_completed,
            subsections = summary.subsections_completed,
            revisions = summary.total_revisions,
            escalated = summary.escalated.len(),
            "session complete"
        );
        Ok(summary)
    }
}
