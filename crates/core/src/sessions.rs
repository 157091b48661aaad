//! # Chat Sessions
//!
//! Chat lifecycle on top of a store: creating a chat with its pipeline,
//! listing, renaming, deleting and adding custom stages.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pipeline::default_stages;
use crate::state::{
    Chat, ChatId, ChatStore, ChatWithStages, NewStage, PipelineStore, Stage, StageStore,
};

/// Manages chats and their stage bundles
#[derive(Clone)]
pub struct ChatSessions {
    store: Arc<dyn PipelineStore>,
}

impl ChatSessions {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Create a chat, optionally with the four canonical stages.
    ///
    /// The chat and its stages are created in one unit: either all exist
    /// afterwards or none do.
    #[tracing::instrument(skip(self, description))]
    pub async fn create_chat(
        &self,
        description: Option<String>,
        create_default_stages: bool,
    ) -> Result<ChatWithStages> {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let stages = if create_default_stages {
            default_stages()
        } else {
            Vec::new()
        };

        let chat = self.store.create_chat(description, stages).await?;
        tracing::info!(
            chat_id = chat.chat.id,
            stages = chat.stages.len(),
            "Chat created"
        );
        Ok(chat)
    }

    /// A chat with its stages in pipeline order
    pub async fn get_chat(&self, chat_id: ChatId) -> Result<ChatWithStages> {
        let chat = self.store.get_chat(chat_id).await?;
        let stages = self.store.list_stages(chat_id).await?;
        Ok(ChatWithStages { chat, stages })
    }

    /// All chats, newest first
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut chats = self.store.list_chats().await?;
        chats.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(chats)
    }

    pub async fn rename_chat(&self, chat_id: ChatId, description: Option<String>) -> Result<Chat> {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.store.update_chat(chat_id, description).await
    }

    /// Delete a chat with all its stages and messages
    #[tracing::instrument(skip(self))]
    pub async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        self.store.delete_chat(chat_id).await?;
        tracing::info!(chat_id, "Chat deleted");
        Ok(())
    }

    /// Append a custom stage to the end of a chat's pipeline
    pub async fn add_stage(&self, chat_id: ChatId, stage: NewStage) -> Result<Stage> {
        if stage.name.trim().is_empty() {
            return Err(Error::validation("stage name must not be empty"));
        }
        let stage = self.store.create_stage(chat_id, stage).await?;
        tracing::info!(chat_id, stage_id = stage.id, name = %stage.name, "Stage added");
        Ok(stage)
    }
}
