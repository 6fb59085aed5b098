//! The refinement state machine: statuses, routing and pointer advance.
//!
//! [`RefinementProgress`] is a plain value. Every pipeline step takes the
//! current record and returns an updated copy with `version` bumped, so the
//! driver always holds one consistent snapshot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use refine_core::plan::Plan;

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubsectionStatus {
    ReadyForContextPrep,
    ReadyForWriting,
    ReadyForContentReview,
    ReadyForContentRevision,
    ReadyForGroundingReview,
    ReadyForGroundingRevision,
    Completed,
    /// Revision cap exhausted; terminal.
    NeedsHumanReview,
}

impl SubsectionStatus {
    pub const ALL: [Self; 8] = [
        Self::ReadyForContextPrep,
        Self::ReadyForWriting,
        Self::ReadyForContentReview,
        Self::ReadyForContentRevision,
        Self::ReadyForGroundingReview,
        Self::ReadyForGroundingRevision,
        Self::Completed,
        Self::NeedsHumanReview,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::NeedsHumanReview)
    }

    pub fn after_content_review(passed: bool) -> Self {
        if passed {
            Self::ReadyForGroundingReview
        } else {
            Self::ReadyForContentRevision
        }
    }

    pub fn after_grounding_review(passed: bool) -> Self {
        if passed {
            Self::Completed
        } else {
            Self::ReadyForGroundingRevision
        }
    }

    /// Review stage a revision hands back to.
    pub fn after_revision(self) -> Option<Self> {
        match self {
            Self::ReadyForContentRevision => Some(Self::ReadyForContentReview),
            Self::ReadyForGroundingRevision => Some(Self::ReadyForGroundingReview),
            _ => None,
        }
    }
}

impl fmt::Display for SubsectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadyForContextPrep => "READY_FOR_CONTEXT_PREP",
            Self::ReadyForWriting => "READY_FOR_WRITING",
            Self::ReadyForContentReview => "READY_FOR_CONTENT_REVIEW",
            Self::ReadyForContentRevision => "READY_FOR_CONTENT_REVISION",
            Self::ReadyForGroundingReview => "READY_FOR_GROUNDING_REVIEW",
            Self::ReadyForGroundingRevision => "READY_FOR_GROUNDING_REVISION",
            Self::Completed => "COMPLETED",
            Self::NeedsHumanReview => "NEEDS_HUMAN_REVIEW",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// What the engine does next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    PrepareContext,
    Write,
    ReviewContent,
    ReviseContent,
    ReviewGrounding,
    ReviseGrounding,
    Advance,
    Escalate,
    Complete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrepareContext => "prepare_context",
            Self::Write => "write",
            Self::ReviewContent => "review_content",
            Self::ReviseContent => "revise_content",
            Self::ReviewGrounding => "review_grounding",
            Self::ReviseGrounding => "revise_grounding",
            Self::Advance => "advance",
            Self::Escalate => "escalate",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Status to action, one entry per status.
pub fn action_for(status: SubsectionStatus) -> Action {
    match status {
        SubsectionStatus::ReadyForContextPrep => Action::PrepareContext,
        SubsectionStatus::ReadyForWriting => Action::Write,
        SubsectionStatus::ReadyForContentReview => Action::ReviewContent,
        SubsectionStatus::ReadyForContentRevision => Action::ReviseContent,
        SubsectionStatus::ReadyForGroundingReview => Action::ReviewGrounding,
        SubsectionStatus::ReadyForGroundingRevision => Action::ReviseGrounding,
        SubsectionStatus::Completed => Action::Advance,
        SubsectionStatus::NeedsHumanReview => Action::Escalate,
    }
}

/// Next action for `progress`. Plan exhaustion wins over any status.
pub fn route(progress: &RefinementProgress) -> Action {
    if progress.is_complete() {
        return Action::Complete;
    }
    action_for(progress.current_subsection_status)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementProgress {
    pub total_sections: usize,
    pub subsections_per_section: BTreeMap<usize, usize>,
    pub current_section_index: usize,
    pub current_section_status: SectionStatus,
    pub current_subsection_index: usize,
    pub current_subsection_status: SubsectionStatus,
    pub completed_sections: Vec<usize>,
    /// Subsections finished (completed or escalated) per section.
    #[serde(default)]
    pub completed_subsections: BTreeMap<usize, Vec<usize>>,
    /// Note on the most recent review outcome.
    #[serde(default)]
    pub current_review_status: String,
    /// Bumped once per executed step.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    initialised: bool,
}

impl Default for RefinementProgress {
    fn default() -> Self {
        Self {
            total_sections: 0,
            subsections_per_section: BTreeMap::new(),
            current_section_index: 0,
            current_section_status: SectionStatus::NotStarted,
            current_subsection_index: 0,
            current_subsection_status: SubsectionStatus::ReadyForContextPrep,
            completed_sections: Vec::new(),
            completed_subsections: BTreeMap::new(),
            current_review_status: String::new(),
            version: 0,
            initialised: false,
        }
    }
}

impl RefinementProgress {
    /// Fresh record for `plan` with every pointer at the start.
    pub fn initialise(plan: &Plan) -> Self {
        Self {
            total_sections: plan.section_count(),
            subsections_per_section: plan.subsections_per_section(),
            initialised: true,
            ..Self::default()
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn is_complete(&self) -> bool {
        self.current_section_index >= self.total_sections
    }

    pub fn subsections_in_current_section(&self) -> usize {
        self.subsections_per_section
            .get(&self.current_section_index)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_subsections(&self) -> usize {
        self.subsections_per_section.values().sum()
    }

    /// "Section x/y, Subsection a/b", one-based.
    pub fn position(&self) -> String {
        format!(
            "Section {}/{}, Subsection {}/{}",
            self.current_section_index + 1,
            self.total_sections,
            self.current_subsection_index + 1,
            self.subsections_in_current_section()
        )
    }

    /// Move past the finished subsection.
    ///
    /// Only legal when the current subsection is terminal. Within a section
    /// the subsection index increments; after the last one the section is
    /// recorded as completed and the pointers move to the next section.
    pub fn advance(&mut self) -> Result<()> {
        if !self.initialised {
            return Err(EngineError::InvariantViolation(
                "advance on an uninitialised progress record".into(),
            ));
        }
        if self.is_complete() {
            return Err(EngineError::InvariantViolation(
                "advance past the end of the plan".into(),
            ));
        }
        if !self.current_subsection_status.is_terminal() {
            return Err(EngineError::InvariantViolation(format!(
                "advance while subsection {}.{} is {}",
                self.current_section_index, self.current_subsection_index, self.current_subsection_status
            )));
        }

        let section = self.current_section_index;
        self.completed_subsections
            .entry(section)
            .or_default()
            .push(self.current_subsection_index);

        if self.current_subsection_index + 1 < self.subsections_in_current_section() {
            self.current_subsection_index += 1;
            self.current_section_status = SectionStatus::InProgress;
        } else {
            self.completed_sections.push(section);
            self.current_section_index += 1;
            self.current_subsection_index = 0;
            self.current_section_status = SectionStatus::NotStarted;
        }
        self.current_subsection_status = SubsectionStatus::ReadyForContextPrep;
        Ok(())
    }
}
