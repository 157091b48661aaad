//! # Pipeline Records
//!
//! Chats, stages and messages as stored and served. A chat owns its stages,
//! a stage owns its messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type ChatId = i64;
pub type StageId = i64;
pub type MessageId = i64;

/// Status of a pipeline stage
///
/// ```text
/// NotStarted → InProgress → WaitingForApproval → Completed
///                   ↑               │
///                   └──── reject ───┘
/// ```
///
/// `Error` is set explicitly and is left again by re-submitting a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    WaitingForApproval,
    Completed,
    Error,
}

impl StageStatus {
    /// Legacy spellings still found in imported data, with their canonical status.
    pub const LEGACY_SPELLINGS: &'static [(&'static str, StageStatus)] = &[
        ("", StageStatus::NotStarted),
        ("pending", StageStatus::NotStarted),
        ("inProgress", StageStatus::InProgress),
        ("waitingForApproval", StageStatus::WaitingForApproval),
        ("complete", StageStatus::Completed),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::WaitingForApproval => "waiting_for_approval",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parse the canonical spelling only
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "waiting_for_approval" => Some(Self::WaitingForApproval),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Map a canonical or legacy spelling onto the closed enum.
    ///
    /// Used by store migrations; the API accepts canonical spellings only.
    pub fn from_legacy(s: &str) -> Option<Self> {
        Self::parse(s).or_else(|| {
            Self::LEGACY_SPELLINGS
                .iter()
                .find(|(legacy, _)| *legacy == s)
                .map(|(_, status)| *status)
        })
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    /// The pipeline agent. `assistant` is accepted on input.
    #[serde(alias = "assistant")]
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" | "assistant" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A named bundle of stages representing one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A chat together with its stages in pipeline order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatWithStages {
    #[serde(flatten)]
    pub chat: Chat,
    pub stages: Vec<Stage>,
}

/// One step of a chat's pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Stage {
    pub id: StageId,
    pub chat_id: ChatId,
    pub name: String,
    /// Zero-based position within the chat
    pub position: u32,
    pub status: StageStatus,
    #[serde(default)]
    pub description: Option<String>,
    /// Set when a requirements stage is approved
    #[serde(default)]
    pub requirements_summary: Option<String>,
    #[serde(default)]
    pub next_stage_id: Option<StageId>,
    /// Gateway path invoked for this stage's agent
    #[serde(default)]
    pub pipeline_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stage {
    /// Merge the `Some` fields of an update into this stage
    pub fn apply(&mut self, update: &StageUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(summary) = &update.requirements_summary {
            self.requirements_summary = Some(summary.clone());
        }
        if let Some(endpoint) = &update.pipeline_endpoint {
            self.pipeline_endpoint = Some(endpoint.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// A single chat turn, immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "stageId")]
    pub stage_id: StageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields for a stage that does not exist yet
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewStage {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pipeline_endpoint: Option<String>,
}

impl NewStage {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.pipeline_endpoint = Some(endpoint.into());
        self
    }
}

/// Partial stage update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StageUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<StageStatus>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requirements_summary: Option<String>,
    #[serde(default)]
    pub pipeline_endpoint: Option<String>,
}

impl StageUpdate {
    pub fn status(status: StageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.description.is_none()
            && self.requirements_summary.is_none()
            && self.pipeline_endpoint.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&StageStatus::WaitingForApproval).unwrap();
        assert_eq!(json, "\"waiting_for_approval\"");

        let parsed: StageStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(parsed, StageStatus::InProgress);
    }

    #[test]
    fn test_legacy_spellings_rejected_on_the_wire() {
        assert!(serde_json::from_str::<StageStatus>("\"inProgress\"").is_err());
        assert!(serde_json::from_str::<StageStatus>("\"complete\"").is_err());
        assert_eq!(StageStatus::parse("complete"), None);
    }

    #[test]
    fn test_legacy_mapping() {
        assert_eq!(StageStatus::from_legacy(""), Some(StageStatus::NotStarted));
        assert_eq!(
            StageStatus::from_legacy("pending"),
            Some(StageStatus::NotStarted)
        );
        assert_eq!(
            StageStatus::from_legacy("waitingForApproval"),
            Some(StageStatus::WaitingForApproval)
        );
        assert_eq!(
            StageStatus::from_legacy("complete"),
            Some(StageStatus::Completed)
        );
        assert_eq!(
            StageStatus::from_legacy("completed"),
            Some(StageStatus::Completed)
        );
        assert_eq!(StageStatus::from_legacy("done"), None);
    }

    #[test]
    fn test_role_accepts_assistant() {
        let role: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, Role::Agent);
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"agent\"");
        assert!(serde_json::from_str::<Role>("\"robot\"").is_err());
    }

    #[test]
    fn test_message_uses_stage_id_key() {
        let message = Message {
            id: 1,
            stage_id: 4,
            role: Role::User,
            content: "hi".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["stageId"], 4);
        assert_eq!(value["role"], "user");
    }

    #[test]
    fn test_stage_apply_merges_only_set_fields() {
        let now = Utc::now();
        let mut stage = Stage {
            id: 1,
            chat_id: 1,
            name: "Implementation".to_string(),
            position: 2,
            status: StageStatus::InProgress,
            description: Some("keep me".to_string()),
            requirements_summary: None,
            next_stage_id: Some(2),
            pipeline_endpoint: None,
            created_at: now,
            updated_at: now,
        };

        stage.apply(&StageUpdate::status(StageStatus::Error));

        assert_eq!(stage.status, StageStatus::Error);
        assert_eq!(stage.description.as_deref(), Some("keep me"));
        assert_eq!(stage.next_stage_id, Some(2));
        assert!(stage.updated_at >= now);
    }
}
