//! # Pipeline Stages
//!
//! The canonical four-stage pipeline and the status state machine every
//! stage follows.

use crate::error::{Error, Result};
use crate::state::{Message, NewStage, Role, StageStatus};

/// Canonical stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Agent interviews the user about what to build
    RequirementsGathering,
    /// Agent turns requirements into a technical plan
    TechnicalSpecification,
    /// Agent implements the plan
    Implementation,
    /// Agent reviews the implementation
    CodeReview,
}

impl StageKind {
    /// All canonical stages in pipeline order
    pub const ALL: [StageKind; 4] = [
        StageKind::RequirementsGathering,
        StageKind::TechnicalSpecification,
        StageKind::Implementation,
        StageKind::CodeReview,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RequirementsGathering => "Requirements Gathering",
            Self::TechnicalSpecification => "Technical Specification",
            Self::Implementation => "Implementation",
            Self::CodeReview => "Code Review",
        }
    }

    /// Gateway path serving this stage's agent
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::RequirementsGathering => "/api/pipeline/requirements-gatherer",
            Self::TechnicalSpecification => "/api/pipeline/tech-spec-generator",
            Self::Implementation => "/api/pipeline/implementation",
            Self::CodeReview => "/api/pipeline/code-review",
        }
    }

    /// Recognize a canonical stage by its name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.display_name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether approving this stage records a requirements summary
    pub fn produces_summary(&self) -> bool {
        matches!(self, Self::RequirementsGathering)
    }
}

/// The four canonical stages, ready to be created with a new chat
pub fn default_stages() -> Vec<NewStage> {
    StageKind::ALL
        .into_iter()
        .map(|kind| NewStage::named(kind.display_name()).with_endpoint(kind.default_endpoint()))
        .collect()
}

/// Static opening line for a stage that was just started
pub fn opening_message(stage_name: &str) -> String {
    format!("Starting {}. How would you like to proceed?", stage_name)
}

/// Summary of everything the user said in a stage, one message per line
pub fn requirements_summary(messages: &[Message]) -> String {
    let requirements = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("Requirements Summary:\n{}", requirements)
}

impl StageStatus {
    /// Whether a user message may be submitted in this status
    pub fn accepts_submissions(&self) -> bool {
        !matches!(self, StageStatus::Completed)
    }

    /// Status after an agent reply has been stored.
    ///
    /// A stage waiting for approval keeps waiting whatever the agent says;
    /// only approve or reject move it.
    pub fn after_reply(self, approval_needed: bool) -> StageStatus {
        match self {
            _ if approval_needed => StageStatus::WaitingForApproval,
            StageStatus::NotStarted | StageStatus::Error => StageStatus::InProgress,
            other => other,
        }
    }

    /// Status after an explicit approval
    pub fn approve(self) -> Result<StageStatus> {
        match self {
            StageStatus::WaitingForApproval => Ok(StageStatus::Completed),
            other => Err(Error::conflict(format!(
                "stage is {} and cannot be approved",
                other
            ))),
        }
    }

    /// Status after the user requested changes
    pub fn reject(self) -> Result<StageStatus> {
        match self {
            StageStatus::WaitingForApproval => Ok(StageStatus::InProgress),
            other => Err(Error::conflict(format!(
                "stage is {} and cannot be rejected",
                other
            ))),
        }
    }
}
