//! # In-Memory Store
//!
//! Non-persistent `PipelineStore` backed by maps behind one `RwLock`.
//! Chat-level bundles run under a single write lock, which makes them atomic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::model::{
    Chat, ChatId, ChatWithStages, Message, MessageId, NewStage, Role, Stage, StageId,
    StageStatus, StageUpdate,
};
use super::store::{ChatStore, MessageStore, StageStore};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    chats: BTreeMap<ChatId, Chat>,
    stages: BTreeMap<StageId, Stage>,
    messages: HashMap<StageId, Vec<Message>>,
    last_chat_id: ChatId,
    last_stage_id: StageId,
    last_message_id: MessageId,
}

impl Inner {
    fn stages_of(&self, chat_id: ChatId) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self
            .stages
            .values()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.position);
        stages
    }

    /// Insert a stage at the tail of the chat, linking the previous tail to it
    fn push_stage(&mut self, chat_id: ChatId, new: NewStage) -> Stage {
        let existing = self.stages_of(chat_id);
        self.last_stage_id += 1;
        let now = Utc::now();
        let stage = Stage {
            id: self.last_stage_id,
            chat_id,
            name: new.name,
            position: existing.len() as u32,
            status: StageStatus::NotStarted,
            description: new.description,
            requirements_summary: None,
            next_stage_id: None,
            pipeline_endpoint: new.pipeline_endpoint,
            created_at: now,
            updated_at: now,
        };

        if let Some(tail) = existing.last() {
            if let Some(tail) = self.stages.get_mut(&tail.id) {
                tail.next_stage_id = Some(stage.id);
                tail.updated_at = now;
            }
        }
        self.stages.insert(stage.id, stage.clone());
        stage
    }
}

/// Process-local store, used for tests and `--store memory`
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(
        &self,
        description: Option<String>,
        stages: Vec<NewStage>,
    ) -> Result<ChatWithStages> {
        let mut inner = self.inner.write().await;
        inner.last_chat_id += 1;
        let chat = Chat {
            id: inner.last_chat_id,
            description,
            created_at: Utc::now(),
        };
        inner.chats.insert(chat.id, chat.clone());

        for new in stages {
            inner.push_stage(chat.id, new);
        }
        // Re-read so every stage carries its final successor pointer
        let stages = inner.stages_of(chat.id);

        Ok(ChatWithStages { chat, stages })
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.inner
            .read()
            .await
            .chats
            .get(&chat_id)
            .cloned()
            .ok_or(Error::not_found("chat", chat_id))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        Ok(self.inner.read().await.chats.values().cloned().collect())
    }

    async fn update_chat(&self, chat_id: ChatId, description: Option<String>) -> Result<Chat> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or(Error::not_found("chat", chat_id))?;
        chat.description = description;
        Ok(chat.clone())
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.chats.remove(&chat_id).is_none() {
            return Err(Error::not_found("chat", chat_id));
        }

        let stage_ids: Vec<StageId> = inner
            .stages
            .values()
            .filter(|s| s.chat_id == chat_id)
            .map(|s| s.id)
            .collect();
        for stage_id in &stage_ids {
            inner.stages.remove(stage_id);
            inner.messages.remove(stage_id);
        }

        tracing::debug!(chat_id, stages = stage_ids.len(), "Deleted chat");
        Ok(())
    }
}

#[async_trait]
impl StageStore for MemoryStore {
    async fn create_stage(&self, chat_id: ChatId, stage: NewStage) -> Result<Stage> {
        let mut inner = self.inner.write().await;
        if !inner.chats.contains_key(&chat_id) {
            return Err(Error::not_found("chat", chat_id));
        }
        Ok(inner.push_stage(chat_id, stage))
    }

    async fn get_stage(&self, stage_id: StageId) -> Result<Stage> {
        self.inner
            .read()
            .await
            .stages
            .get(&stage_id)
            .cloned()
            .ok_or(Error::not_found("stage", stage_id))
    }

    async fn update_stage(&self, stage_id: StageId, update: StageUpdate) -> Result<Stage> {
        let mut inner = self.inner.write().await;
        let stage = inner
            .stages
            .get_mut(&stage_id)
            .ok_or(Error::not_found("stage", stage_id))?;
        stage.apply(&update);
        Ok(stage.clone())
    }

    async fn list_stages(&self, chat_id: ChatId) -> Result<Vec<Stage>> {
        let inner = self.inner.read().await;
        if !inner.chats.contains_key(&chat_id) {
            return Err(Error::not_found("chat", chat_id));
        }
        Ok(inner.stages_of(chat_id))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(
        &self,
        stage_id: StageId,
        role: Role,
        content: String,
    ) -> Result<Message> {
        let mut inner = self.inner.write().await;
        if !inner.stages.contains_key(&stage_id) {
            return Err(Error::not_found("stage", stage_id));
        }

        inner.last_message_id += 1;
        let message = Message {
            id: inner.last_message_id,
            stage_id,
            role,
            content,
            timestamp: Utc::now(),
        };
        inner
            .messages
            .entry(stage_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, stage_id: StageId) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        if !inner.stages.contains_key(&stage_id) {
            return Err(Error::not_found("stage", stage_id));
        }
        Ok(inner.messages.get(&stage_id).cloned().unwrap_or_default())
    }
}
