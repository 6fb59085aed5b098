//! The engine and its single exposed operation, [`Engine::run_step`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use refine_core::collaborators::SubsectionStore;
use refine_core::ids::SessionId;
use refine_core::plan::Plan;
use refine_core::provider::{LlmProvider, StreamOptions};
use refine_core::survey::ContentTree;
use refine_core::tools::Tool;
use refine_retrieval::{ContextBuilder, SearchPaperFragments};
use refine_settings::{EngineSettings, RefineSettings};

use crate::conversation::Conversation;
use crate::error::{EngineError, Result};
use crate::progress::{route, Action, RefinementProgress};

/// External collaborators the engine calls into.
pub struct EngineDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub context: Arc<ContextBuilder>,
    pub store: Arc<dyn SubsectionStore>,
}

/// Runs the refinement pipeline for one session over one plan.
///
/// The engine holds no progress of its own. Callers pass the current
/// [`RefinementProgress`] and [`ContentTree`] to [`Engine::run_step`] and get
/// updated copies back; a failed step returns an error and leaves the
/// caller's values untouched.
pub struct Engine {
    pub(crate) session_id: SessionId,
    pub(crate) plan: Arc<Plan>,
    pub(crate) conversation: Conversation,
    pub(crate) context: Arc<ContextBuilder>,
    pub(crate) store: Arc<dyn SubsectionStore>,
    pub(crate) settings: EngineSettings,
    pub(crate) retain_vector_indices: bool,
    pub(crate) cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        session_id: SessionId,
        plan: Arc<Plan>,
        deps: EngineDeps,
        settings: &RefineSettings,
        cancel: CancellationToken,
    ) -> Self {
        let options = StreamOptions {
            max_tokens: Some(settings.llm.max_tokens),
            temperature: settings.llm.temperature,
        };
        let timeout = Duration::from_secs(settings.engine.step_timeout_secs.max(1));
        Self {
            conversation: Conversation::new(
                deps.provider,
                options,
                timeout,
                cancel.clone(),
                session_id.clone(),
            ),
            session_id,
            plan,
            context: deps.context,
            store: deps.store,
            settings: settings.engine.clone(),
            retain_vector_indices: settings.store.retain_vector_indices,
            cancel,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn max_revisions(&self) -> u32 {
        self.settings.max_revisions
    }

    /// A fresh progress record for this engine's plan.
    pub fn initial_progress(&self) -> RefinementProgress {
        RefinementProgress::initialise(&self.plan)
    }

    /// Execute the action [`route`] selects for `progress`.
    ///
    /// `Complete` is a no-op; use [`Engine::complete`] to close the session.
    #[instrument(skip_all, fields(session_id = %self.session_id, version = progress.version))]
    pub async fn run_step(
        &self,
        progress: &RefinementProgress,
        tree: &ContentTree,
    ) -> Result<(RefinementProgress, ContentTree)> {
        if !progress.is_initialised() {
            return Err(EngineError::InvariantViolation(
                "step on an uninitialised progress record".into(),
            ));
        }
        let action = route(progress);
        if action == Action::Complete {
            return Ok((progress.clone(), tree.clone()));
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }

        info!(
            position = %progress.position(),
            status = %progress.current_subsection_status,
            %action,
            "running step"
        );

        let mut next = progress.clone();
        let mut tree = tree.clone();
        match action {
            Action::PrepareContext => self.prepare_context(&mut next, &mut tree).await?,
            Action::Write => self.write(&mut next, &mut tree).await?,
            Action::ReviewContent => self.review_content(&mut next, &mut tree).await?,
            Action::ReviewGrounding => self.review_grounding(&mut next, &mut tree).await?,
            Action::ReviseContent | Action::ReviseGrounding => {
                self.revise(&mut next, &mut tree).await?;
            }
            Action::Advance | Action::Escalate => self.finish_subsection(&mut next, &mut tree, action)?,
            Action::Complete => {}
        }
        next.version += 1;
        Ok((next, tree))
    }

    /// Await `fut` under the step timeout.
    pub(crate) async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        let limit = Duration::from_secs(self.settings.step_timeout_secs.max(1));
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| EngineError::Timeout(limit))
    }

    /// The evidence-search tool restricted to `allowed` paper ids.
    pub(crate) fn search_tools(&self, allowed: Vec<String>) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(SearchPaperFragments::new(
            Arc::clone(&self.context),
            self.session_id.clone(),
            allowed,
        ))]
    }
}
