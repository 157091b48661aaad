//! # Stage Pipeline
//!
//! Moves a chat through its stages.
//!
//! ## Stage Flow
//!
//! ```text
//! Requirements Gathering → Technical Specification → Implementation → Code Review
//! ```
//!
//! Each stage is a conversation with an agent. A stage completes only when
//! the agent asks for approval and the user approves.

pub mod approval;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod simulated;
pub mod stages;

pub use approval::{requests_approval, APPROVAL_SENTINEL};
pub use events::{Notifier, StageEvent};
pub use gateway::{AgentGateway, AgentTurn, GatewayReply, GatewayRequest, HistoryEntry, HttpGateway};
pub use orchestrator::{ApprovalOutcome, Orchestrator, OrchestratorSettings, SubmitOutcome};
pub use simulated::SimulatedGateway;
pub use stages::{default_stages, StageKind};
