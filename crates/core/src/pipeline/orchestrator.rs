//! # Pipeline Orchestrator
//!
//! Drives one stage's conversation: stores the user's turn, asks the agent
//! gateway for a reply, stores it, and applies the approval-gated status
//! transitions. Work on one stage is serialized; different stages run
//! concurrently.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use utoipa::ToSchema;

use super::approval;
use super::events::{Notifier, StageEvent};
use super::gateway::{AgentGateway, GatewayReply, GatewayRequest, HistoryEntry};
use super::stages::{self, StageKind};
use crate::config::{Config, SeedMode};
use crate::error::{Error, Result};
use crate::state::{
    Message, MessageStore, PipelineStore, Role, Stage, StageId, StageStatus, StageStore,
    StageUpdate,
};

/// Knobs the orchestrator reads on every exchange
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Model name forwarded to the gateway
    pub prompt_model_name: String,
    /// Upper bound on one gateway call
    pub gateway_timeout: Duration,
    /// Scan reply text for approval markers when no explicit flag is sent
    pub sentinel_fallback: bool,
    pub seed_mode: SeedMode,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prompt_model_name: config.gateway.prompt_model_name.clone(),
            gateway_timeout: config.gateway.timeout(),
            sentinel_fallback: config.pipeline.sentinel_fallback,
            seed_mode: config.pipeline.seed_mode,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of a message submission
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmitOutcome {
    /// Messages created by this submission, oldest first
    pub messages: Vec<Message>,
    /// The stage after the exchange
    pub stage: Stage,
    pub approval_needed: bool,
}

/// Result of approving a stage
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApprovalOutcome {
    /// The approved stage, now completed
    pub stage: Stage,
    /// The successor, started if it had not been yet
    pub next_stage: Option<Stage>,
    /// Opening messages seeded into a freshly started successor
    pub messages: Vec<Message>,
}

/// One async mutex per stage, created on demand
#[derive(Default)]
struct StageLocks {
    locks: Mutex<HashMap<StageId, Arc<AsyncMutex<()>>>>,
}

impl StageLocks {
    async fn acquire(&self, stage_id: StageId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on
            locks.retain(|id, lock| *id == stage_id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(stage_id).or_default())
        };
        lock.lock_owned().await
    }
}

/// The stage state machine, wired to a store, a gateway and a notifier
pub struct Orchestrator {
    store: Arc<dyn PipelineStore>,
    gateway: Arc<dyn AgentGateway>,
    notifier: Notifier,
    settings: OrchestratorSettings,
    locks: StageLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        gateway: Arc<dyn AgentGateway>,
        notifier: Notifier,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            settings,
            locks: StageLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Submit a message to a stage.
    ///
    /// User messages run the full exchange: store the message, call the
    /// gateway with the stage history, store the reply, update the status.
    /// If the gateway fails the user message stays stored and nothing else
    /// changes. Agent and system messages are stored as-is.
    #[tracing::instrument(skip(self, content))]
    pub async fn submit_message(
        &self,
        stage_id: StageId,
        role: Role,
        content: String,
    ) -> Result<SubmitOutcome> {
        if content.trim().is_empty() {
            return Err(Error::validation("message content must not be empty"));
        }

        let _guard = self.locks.acquire(stage_id).await;
        let stage = self.store.get_stage(stage_id).await?;

        if role != Role::User {
            let message = self.store.append_message(stage_id, role, content).await?;
            self.notifier
                .publish(StageEvent::messages(stage_id, vec![message.clone()]));
            return Ok(SubmitOutcome {
                messages: vec![message],
                stage,
                approval_needed: false,
            });
        }

        if !stage.status.accepts_submissions() {
            return Err(Error::conflict(format!(
                "stage {} is {} and accepts no further messages",
                stage_id, stage.status
            )));
        }
        if self.gateway.requires_endpoint() && stage.pipeline_endpoint.is_none() {
            return Err(Error::validation(format!(
                "stage '{}' has no pipeline endpoint",
                stage.name
            )));
        }

        let user_message = self
            .store
            .append_message(stage_id, Role::User, content)
            .await?;
        let history = self.store.list_messages(stage_id).await?;

        let reply = match self.call_gateway(&stage, &history).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(stage_id, error = %e, "Agent gateway failed, user message kept");
                self.notifier
                    .publish(StageEvent::messages(stage_id, vec![user_message]));
                return Err(e);
            }
        };

        let approval_needed = self.approval_signal(&reply);
        let agent_message = self
            .store
            .append_message(stage_id, Role::Agent, reply.response.content)
            .await?;

        let next_status = stage.status.after_reply(approval_needed);
        let stage = if next_status != stage.status {
            tracing::info!(stage_id, from = %stage.status, to = %next_status, "Stage status changed");
            let updated = self
                .store
                .update_stage(stage_id, StageUpdate::status(next_status))
                .await?;
            self.notifier.publish(StageEvent::stage(updated.clone()));
            updated
        } else {
            stage
        };

        let messages = vec![user_message, agent_message];
        self.notifier
            .publish(StageEvent::messages(stage_id, messages.clone()));

        Ok(SubmitOutcome {
            messages,
            stage,
            approval_needed,
        })
    }

    /// Approve a stage waiting for approval and start its successor
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, stage_id: StageId) -> Result<ApprovalOutcome> {
        let _guard = self.locks.acquire(stage_id).await;
        let stage = self.store.get_stage(stage_id).await?;

        let mut update = StageUpdate::status(stage.status.approve()?);
        if StageKind::from_name(&stage.name).is_some_and(|kind| kind.produces_summary()) {
            let messages = self.store.list_messages(stage_id).await?;
            update.requirements_summary = Some(stages::requirements_summary(&messages));
        }

        let completed = self.store.update_stage(stage_id, update).await?;
        tracing::info!(stage_id, chat_id = completed.chat_id, "Stage approved");
        self.notifier.publish(StageEvent::stage(completed.clone()));

        let Some(next) = self.successor_of(&completed).await? else {
            tracing::info!(chat_id = completed.chat_id, "Pipeline complete");
            return Ok(ApprovalOutcome {
                stage: completed,
                next_stage: None,
                messages: Vec::new(),
            });
        };

        let _next_guard = self.locks.acquire(next.id).await;
        // Re-read under its lock; only a stage nobody has touched is started
        let next = self.store.get_stage(next.id).await?;
        if next.status != StageStatus::NotStarted {
            tracing::info!(
                stage_id = next.id,
                status = %next.status,
                "Successor already underway, leaving it as is"
            );
            return Ok(ApprovalOutcome {
                stage: completed,
                next_stage: Some(next),
                messages: Vec::new(),
            });
        }

        let next = self
            .store
            .update_stage(next.id, StageUpdate::status(StageStatus::InProgress))
            .await?;
        let opening = self.opening_message(&completed, &next).await?;
        let seeded = self
            .store
            .append_message(next.id, Role::Agent, opening)
            .await?;

        tracing::info!(stage_id = next.id, name = %next.name, "Next stage started");
        self.notifier.publish(StageEvent::stage(next.clone()));
        self.notifier
            .publish(StageEvent::messages(next.id, vec![seeded.clone()]));

        Ok(ApprovalOutcome {
            stage: completed,
            next_stage: Some(next),
            messages: vec![seeded],
        })
    }

    /// Send a stage waiting for approval back to the agent
    #[tracing::instrument(skip(self))]
    pub async fn reject(&self, stage_id: StageId) -> Result<Stage> {
        let _guard = self.locks.acquire(stage_id).await;
        let stage = self.store.get_stage(stage_id).await?;

        let status = stage.status.reject()?;
        let updated = self
            .store
            .update_stage(stage_id, StageUpdate::status(status))
            .await?;
        tracing::info!(stage_id, "Stage sent back for changes");
        self.notifier.publish(StageEvent::stage(updated.clone()));

        Ok(updated)
    }

    /// Direct field update, bypassing the transition rules
    #[tracing::instrument(skip(self, update))]
    pub async fn update_stage(&self, stage_id: StageId, update: StageUpdate) -> Result<Stage> {
        if update.is_empty() {
            return Err(Error::validation("no stage fields to update"));
        }
        if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(Error::validation("stage name must not be empty"));
        }

        let _guard = self.locks.acquire(stage_id).await;
        let stage = self.store.update_stage(stage_id, update).await?;
        self.notifier.publish(StageEvent::stage(stage.clone()));
        Ok(stage)
    }

    async fn call_gateway(&self, stage: &Stage, history: &[Message]) -> Result<GatewayReply> {
        let request = GatewayRequest {
            prompt_model_name: self.settings.prompt_model_name.clone(),
            message_history: history.iter().map(HistoryEntry::from).collect(),
            stage_id: Some(stage.id),
            endpoint: stage.pipeline_endpoint.clone(),
            stage_name: stage.name.clone(),
        };

        let timeout = self.settings.gateway_timeout;
        tokio::time::timeout(timeout, self.gateway.invoke(request))
            .await
            .map_err(|_| Error::GatewayTimeout(timeout))?
    }

    /// Explicit flag first; text markers only as a fallback
    fn approval_signal(&self, reply: &GatewayReply) -> bool {
        reply.approval_needed.unwrap_or_else(|| {
            self.settings.sentinel_fallback && approval::requests_approval(&reply.response.content)
        })
    }

    /// Successor by `next_stage_id`, else the stage at the next position
    async fn successor_of(&self, stage: &Stage) -> Result<Option<Stage>> {
        if let Some(next_id) = stage.next_stage_id.filter(|id| *id != stage.id) {
            match self.store.get_stage(next_id).await {
                Ok(next) => return Ok(Some(next)),
                Err(Error::NotFound { .. }) => {
                    tracing::warn!(
                        stage_id = stage.id,
                        next_id,
                        "Dangling successor pointer, falling back to position"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let stages = self.store.list_stages(stage.chat_id).await?;
        Ok(stages
            .into_iter()
            .find(|s| s.position == stage.position + 1 && s.id != stage.id))
    }

    async fn opening_message(&self, approved: &Stage, next: &Stage) -> Result<String> {
        let template = stages::opening_message(&next.name);
        if self.settings.seed_mode == SeedMode::Template
            || (self.gateway.requires_endpoint() && next.pipeline_endpoint.is_none())
        {
            return Ok(template);
        }

        let history = self.store.list_messages(approved.id).await?;
        match self.call_gateway(next, &history).await {
            Ok(reply) => Ok(reply.response.content),
            Err(e) => {
                tracing::warn!(stage_id = next.id, error = %e, "Seeding call failed, using template");
                Ok(template)
            }
        }
    }
}
