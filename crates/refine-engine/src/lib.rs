//! Subsection refinement engine.
//!
//! Turns a [`Plan`](refine_core::Plan) into reviewed, citation-grounded
//! prose one subsection at a time. Each call to [`Engine::run_step`]
//! performs the single action [`route`] selects for the current
//! [`RefinementProgress`]: prepare context, draft, review content, verify
//! citations, revise, or move on. [`drive`] loops it to the end of the plan.

pub mod completion;
pub mod content_review;
pub mod conversation;
pub mod driver;
pub mod error;
pub mod grounding;
pub mod pipeline;
pub mod progress;
pub mod prompts;

mod context_prep;
mod drafting;
mod revision;

#[cfg(test)]
mod test_support;

pub use completion::RunSummary;
pub use driver::{drive, RunReport, StepFailure};
pub use error::EngineError;
pub use pipeline::{Engine, EngineDeps};
pub use progress::{route, Action, RefinementProgress, SectionStatus, SubsectionStatus};
