use tracing::{info, instrument};

use refine_core::survey::{ContentTree, Subsection};

use crate::error::{EngineError, Result};
use crate::pipeline::Engine;
use crate::progress::{RefinementProgress, SectionStatus, SubsectionStatus};

impl Engine {
    /// Gather evidence for the current key point and open its subsection.
    #[instrument(skip_all, fields(
        section = progress.current_section_index,
        subsection = progress.current_subsection_index
    ))]
    pub(crate) async fn prepare_context(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let section_plan = self.plan.section(s).ok_or_else(|| {
            EngineError::InvariantViolation(format!("section {s} is not in the plan"))
        })?;
        let key_point = section_plan.key_points.get(k).ok_or_else(|| {
            EngineError::InvariantViolation(format!("key point {s}.{k} is not in the plan"))
        })?;

        let evidence = self
            .bounded(self.context.build(&self.session_id, key_point))
            .await?;
        let available = evidence.iter().filter(|e| e.is_available()).count();
        let papers = evidence.len();

        tree.ensure_section(s, &section_plan.title, &section_plan.outline)?
            .place_subsection(Subsection::new(k, key_point.text.clone(), evidence))?;

        progress.current_section_status = SectionStatus::InProgress;
        progress.current_subsection_status = SubsectionStatus::ReadyForWriting;
        info!(papers, available, "subsection opened");
        Ok(())
    }
}
