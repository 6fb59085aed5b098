use tracing::{info, instrument};

use refine_core::errors::GatewayError;
use refine_core::messages::Message;
use refine_core::survey::{ContentTree, Subsection};

use crate::error::{EngineError, Result};
use crate::pipeline::Engine;
use crate::progress::{RefinementProgress, SubsectionStatus};
use crate::prompts::{drafting_prompt, preceding_content, DraftingInput, WRITER_SYSTEM_PROMPT};

impl Engine {
    /// First draft of the current subsection. Starts its transcript.
    #[instrument(skip_all, fields(
        section = progress.current_section_index,
        subsection = progress.current_subsection_index
    ))]
    pub(crate) async fn write(
        &self,
        progress: &mut RefinementProgress,
        tree: &mut ContentTree,
    ) -> Result<()> {
        let (s, k) = (progress.current_section_index, progress.current_subsection_index);
        let section_plan = self.plan.section(s).ok_or_else(|| {
            EngineError::InvariantViolation(format!("section {s} is not in the plan"))
        })?;
        let preceding = preceding_content(tree, s, k);
        let sub = tree.open_subsection_mut(s, k)?;

        let prompt = drafting_prompt(&DraftingInput {
            key_point: &sub.key_point,
            section_index: s,
            section_title: &section_plan.title,
            section_outline: &section_plan.outline,
            subsection_index: k,
            total_subsections: progress.subsections_in_current_section(),
            preceding,
            papers: &sub.papers,
        });
        let mut transcript = vec![Message::user_text(prompt)];
        let text = self.generate(sub, &mut transcript).await?;

        sub.content = text;
        sub.transcript = transcript;
        progress.current_subsection_status = SubsectionStatus::ReadyForContentReview;
        info!(chars = sub.content.len(), turns = sub.transcript.len(), "draft written");
        Ok(())
    }

    /// Run the writer over `transcript` with evidence search on the
    /// subsection's papers.
    pub(crate) async fn generate(&self, sub: &Subsection, transcript: &mut Vec<Message>) -> Result<String> {
        let tools = self.search_tools(sub.papers.iter().map(|p| p.id.clone()).collect());
        let text = self
            .conversation
            .run_with_tools(
                WRITER_SYSTEM_PROMPT,
                transcript,
                &tools,
                self.settings.max_lookup_rounds,
            )
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::MalformedResponse("writer returned no text".into()).into());
        }
        Ok(text.to_string())
    }
}
