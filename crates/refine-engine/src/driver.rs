//! Outer loop that runs [`Engine::run_step`] until the plan is finished.

use std::fmt;

use tracing::{error, info};

use refine_core::survey::ContentTree;

use crate::completion::RunSummary;
use crate::error::EngineError;
use crate::pipeline::Engine;
use crate::progress::{route, Action, RefinementProgress, SubsectionStatus};

/// Result of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub progress: RefinementProgress,
    pub tree: ContentTree,
    pub steps: u64,
}

/// A run that stopped on an error, with the state it stopped in.
///
/// `progress` and `tree` are the last successfully stepped values, so the
/// run can be resumed from them.
#[derive(Debug)]
pub struct StepFailure {
    pub error: EngineError,
    pub section: usize,
    pub subsection: usize,
    pub status: SubsectionStatus,
    pub revision_count: u32,
    pub revision_limit_exhausted: bool,
    pub progress: RefinementProgress,
    pub tree: ContentTree,
}

impl StepFailure {
    fn new(engine: &Engine, error: EngineError, progress: RefinementProgress, tree: ContentTree) -> Self {
        let (section, subsection) = (progress.current_section_index, progress.current_subsection_index);
        let revision_count = tree
            .subsection(section, subsection)
            .map(|sub| sub.revision_count)
            .unwrap_or(0);
        Self {
            error,
            section,
            subsection,
            status: progress.current_subsection_status,
            revision_count,
            revision_limit_exhausted: revision_count >= engine.max_revisions(),
            progress,
            tree,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "section {} subsection {} failed while {} (revisions: {}{}): {}",
            self.section + 1,
            self.subsection + 1,
            self.status,
            self.revision_count,
            if self.revision_limit_exhausted { ", limit reached" } else { "" },
            self.error
        )
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Step `progress` and `tree` to completion, then close the session.
///
/// `max_steps` bounds the number of executed steps; hitting it is reported
/// as [`EngineError::StepLimit`].
pub async fn drive(
    engine: &Engine,
    mut progress: RefinementProgress,
    mut tree: ContentTree,
    max_steps: Option<u64>,
) -> Result<RunReport, Box<StepFailure>> {
    let mut steps = 0u64;
    while route(&progress) != Action::Complete {
        if let Some(limit) = max_steps.filter(|&max| steps >= max) {
            return Err(Box::new(StepFailure::new(engine, EngineError::StepLimit(limit), progress, tree)));
        }
        match engine.run_step(&progress, &tree).await {
            Ok((next_progress, next_tree)) => {
                progress = next_progress;
                tree = next_tree;
                steps += 1;
            }
            Err(err) => {
                error!(
                    position = %progress.position(),
                    status = %progress.current_subsection_status,
                    error = %err,
                    category = err.category(),
                    "step failed"
                );
                return Err(Box::new(StepFailure::new(engine, err, progress, tree)));
            }
        }
    }

    let summary = match engine.complete(&progress, &tree).await {
        Ok(summary) => summary,
        Err(err) => return Err(Box::new(StepFailure::new(engine, err, progress, tree))),
    };
    info!(steps, "run finished");
    Ok(RunReport {
        summary,
        progress,
        tree,
        steps,
    })
}
