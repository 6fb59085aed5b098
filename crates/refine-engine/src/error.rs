//! Engine error types.

use std::time::Duration;

use refine_core::collaborators::CollaboratorError;
use refine_core::errors::GatewayError;
use refine_core::survey::SurveyError;
use refine_core::tools::ToolError;
use refine_retrieval::RetrievalError;

/// Errors a pipeline step can fail with.
///
/// A step that returns an error leaves the progress record and the content
/// tree exactly as they were; [`EngineError::is_transient`] tells the caller
/// whether running the same step again can succeed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Generation or judgment call failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Document fetch or durable store failure.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// The content tree rejected an edit.
    #[error("Content tree error: {0}")]
    Survey(#[from] SurveyError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The session was cancelled between stages.
    #[error("Operation aborted")]
    Aborted,

    /// An external call exceeded the step timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A structured judgment stayed unparseable after every attempt.
    #[error("Malformed {stage} judgment after {attempts} attempts")]
    MalformedJudgment { stage: &'static str, attempts: u32 },

    /// The driver asked for something the state machine forbids.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The driver ran out of its step allowance.
    #[error("Step limit ({0}) reached")]
    StepLimit(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the failed step can simply be run again later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_transient(),
            Self::Collaborator(e) => e.is_transient(),
            Self::Retrieval(e) => e.is_transient(),
            Self::Timeout(_) => true,
            Self::Survey(_)
            | Self::Tool(_)
            | Self::Aborted
            | Self::MalformedJudgment { .. }
            | Self::InvariantViolation(_)
            | Self::StepLimit(_)
            | Self::Internal(_) => false,
        }
    }

    /// Short category string for logs and reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.error_kind(),
            Self::Collaborator(_) => "collaborator",
            Self::Retrieval(_) => "retrieval",
            Self::Survey(_) => "content_tree",
            Self::Tool(_) => "tool",
            Self::Aborted => "aborted",
            Self::Timeout(_) => "timeout",
            Self::MalformedJudgment { .. } => "malformed_judgment",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::StepLimit(_) => "step_limit",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::Gateway(GatewayError::ProviderOverloaded).is_transient());
        assert!(EngineError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(EngineError::Collaborator(CollaboratorError::Unavailable("db".into())).is_transient());
        assert!(!EngineError::Gateway(GatewayError::AuthenticationFailed("key".into())).is_transient());
        assert!(!EngineError::Aborted.is_transient());
        assert!(!EngineError::InvariantViolation("x".into()).is_transient());
        assert!(!EngineError::MalformedJudgment { stage: "content review", attempts: 3 }.is_transient());
    }

    #[test]
    fn display() {
        let err = EngineError::MalformedJudgment {
            stage: "verification",
            attempts: 3,
        };
        assert_eq!(err.to_string(), "Malformed verification judgment after 3 attempts");
        assert_eq!(EngineError::Aborted.to_string(), "Operation aborted");
    }

    #[test]
    fn category_strings() {
        assert_eq!(EngineError::Gateway(GatewayError::Cancelled).category(), "cancelled");
        assert_eq!(EngineError::StepLimit(10).category(), "step_limit");
        assert_eq!(
            EngineError::Survey(SurveyError::MissingSection(2)).category(),
            "content_tree"
        );
    }
}
