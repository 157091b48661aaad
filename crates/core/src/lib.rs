//! # Conduit Core
//!
//! The engine of the Conduit system: stage pipeline orchestration, chat
//! sessions, persistence and the agent gateway.
//!
//! ## Architecture
//!
//! - `state/` - Chat, stage and message records and the stores holding them
//! - `pipeline/` - Stage state machine, agent gateway and live events
//! - `sessions` - Chat lifecycle (create with default stages, rename, delete)
//! - `config` - `.conduit/config.json` plus environment overrides
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_core::pipeline::{Notifier, Orchestrator, OrchestratorSettings, SimulatedGateway};
//! use conduit_core::sessions::ChatSessions;
//! use conduit_core::state::{MemoryStore, Role};
//!
//! let store = Arc::new(MemoryStore::new());
//! let chat = ChatSessions::new(store.clone()).create_chat(None, true).await?;
//! let orchestrator = Orchestrator::new(
//!     store,
//!     Arc::new(SimulatedGateway::new()),
//!     Notifier::default(),
//!     OrchestratorSettings::default(),
//! );
//! let outcome = orchestrator
//!     .submit_message(chat.stages[0].id, Role::User, "I need an expense tracker".into())
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sessions;
pub mod state;

pub use error::{Error, Result};
