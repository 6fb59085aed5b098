pub mod backoff;
pub mod collaborators;
pub mod context;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod plan;
pub mod provider;
pub mod stream;
pub mod survey;
pub mod tools;

pub use backoff::Backoff;
pub use errors::GatewayError;
pub use ids::{SessionId, ToolCallId};
pub use plan::{KeyPoint, PaperRef, Plan, SectionPlan};
pub use survey::{ContentTree, PaperEvidence, Section, Subsection};
