//! # Store Contracts
//!
//! Traits every persistence backend implements. The orchestrator and the
//! chat session manager only ever see `Arc<dyn PipelineStore>`.

use async_trait::async_trait;

use super::model::{
    Chat, ChatId, ChatWithStages, Message, NewStage, Role, Stage, StageId, StageUpdate,
};
use crate::error::Result;

/// Chat records plus the atomic chat-level bundles
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create a chat and its stages in one unit. Stages are chained through
    /// `next_stage_id` in the order given.
    async fn create_chat(
        &self,
        description: Option<String>,
        stages: Vec<NewStage>,
    ) -> Result<ChatWithStages>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat>;

    /// All chats, in no particular order
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    async fn update_chat(&self, chat_id: ChatId, description: Option<String>) -> Result<Chat>;

    /// Remove the chat, its stages and their messages in one unit
    async fn delete_chat(&self, chat_id: ChatId) -> Result<()>;
}

/// Pipeline stage records
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Append a stage to the end of a chat's pipeline
    async fn create_stage(&self, chat_id: ChatId, stage: NewStage) -> Result<Stage>;

    async fn get_stage(&self, stage_id: StageId) -> Result<Stage>;

    /// Read-modify-write merge scoped to one stage
    async fn update_stage(&self, stage_id: StageId, update: StageUpdate) -> Result<Stage>;

    /// Stages of a chat in pipeline order
    async fn list_stages(&self, chat_id: ChatId) -> Result<Vec<Stage>>;
}

/// Append-only message log per stage
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        stage_id: StageId,
        role: Role,
        content: String,
    ) -> Result<Message>;

    /// Messages of a stage in creation order
    async fn list_messages(&self, stage_id: StageId) -> Result<Vec<Message>>;
}

/// Everything the pipeline needs from persistence
pub trait PipelineStore: ChatStore + StageStore + MessageStore {}

impl<T: ChatStore + StageStore + MessageStore> PipelineStore for T {}

/// Behavior every backend must share. Each backend's test module runs these.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::error::Error;
    use crate::state::model::StageStatus;

    fn four_stages() -> Vec<NewStage> {
        ["Requirements Gathering", "Technical Specification", "Implementation", "Code Review"]
            .into_iter()
            .map(NewStage::named)
            .collect()
    }

    pub async fn chat_creation_chains_stages(store: &dyn PipelineStore) {
        let created = store
            .create_chat(Some("expense tracker".to_string()), four_stages())
            .await
            .unwrap();

        assert_eq!(created.chat.description.as_deref(), Some("expense tracker"));
        assert_eq!(created.stages.len(), 4);
        for (i, stage) in created.stages.iter().enumerate() {
            assert_eq!(stage.position, i as u32);
            assert_eq!(stage.chat_id, created.chat.id);
            assert_eq!(stage.status, StageStatus::NotStarted);
        }
        assert_eq!(created.stages[0].next_stage_id, Some(created.stages[1].id));
        assert_eq!(created.stages[2].next_stage_id, Some(created.stages[3].id));
        assert_eq!(created.stages[3].next_stage_id, None);

        let listed = store.list_stages(created.chat.id).await.unwrap();
        let names: Vec<_> = listed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Requirements Gathering",
                "Technical Specification",
                "Implementation",
                "Code Review"
            ]
        );
    }

    pub async fn messages_are_append_only(store: &dyn PipelineStore) {
        let created = store.create_chat(None, four_stages()).await.unwrap();
        let stage_id = created.stages[0].id;

        assert!(store.list_messages(stage_id).await.unwrap().is_empty());

        let contents = ["first", "second", "third", "fourth", "fifth"];
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Agent };
            store
                .append_message(stage_id, role, content.to_string())
                .await
                .unwrap();
        }

        let messages = store.list_messages(stage_id).await.unwrap();
        assert_eq!(messages.len(), contents.len());
        let listed: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(listed, contents);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
        assert!(messages.iter().all(|m| m.stage_id == stage_id));

        // Other stages stay empty
        let other = store.list_messages(created.stages[1].id).await.unwrap();
        assert!(other.is_empty());
    }

    pub async fn orphan_messages_rejected(store: &dyn PipelineStore) {
        let err = store
            .append_message(9_999, Role::User, "hello".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "stage", id: 9_999 }));

        let err = store.list_messages(9_999).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    pub async fn stage_update_merges(store: &dyn PipelineStore) {
        let created = store.create_chat(None, four_stages()).await.unwrap();
        let stage_id = created.stages[0].id;

        let updated = store
            .update_stage(stage_id, StageUpdate::status(StageStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(updated.status, StageStatus::InProgress);

        let updated = store
            .update_stage(
                stage_id,
                StageUpdate {
                    requirements_summary: Some("Requirements Summary:\nbudget".to_string()),
                    ..StageUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, StageStatus::InProgress);
        assert_eq!(
            updated.requirements_summary.as_deref(),
            Some("Requirements Summary:\nbudget")
        );

        let fetched = store.get_stage(stage_id).await.unwrap();
        assert_eq!(fetched, updated);

        let err = store
            .update_stage(9_999, StageUpdate::status(StageStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "stage", .. }));
    }

    pub async fn returned_records_match_stored(store: &dyn PipelineStore) {
        let created = store.create_chat(None, four_stages()).await.unwrap();
        let stage_id = created.stages[0].id;

        let appended = store
            .append_message(stage_id, Role::User, "track groceries".to_string())
            .await
            .unwrap();
        assert_eq!(store.list_messages(stage_id).await.unwrap(), vec![appended]);

        let updated = store
            .update_stage(stage_id, StageUpdate::status(StageStatus::WaitingForApproval))
            .await
            .unwrap();
        assert_eq!(store.get_stage(stage_id).await.unwrap(), updated);
    }

    pub async fn individual_stage_appends_to_pipeline(store: &dyn PipelineStore) {
        let created = store
            .create_chat(None, vec![NewStage::named("Requirements Gathering")])
            .await
            .unwrap();
        let first = &created.stages[0];

        let added = store
            .create_stage(
                created.chat.id,
                NewStage::named("Security Review").with_endpoint("/api/pipeline/security"),
            )
            .await
            .unwrap();
        assert_eq!(added.position, 1);
        assert_eq!(added.status, StageStatus::NotStarted);
        assert_eq!(added.pipeline_endpoint.as_deref(), Some("/api/pipeline/security"));

        let first = store.get_stage(first.id).await.unwrap();
        assert_eq!(first.next_stage_id, Some(added.id));

        let err = store
            .create_stage(9_999, NewStage::named("Orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "chat", .. }));
    }

    pub async fn delete_cascades(store: &dyn PipelineStore) {
        let doomed = store.create_chat(None, four_stages()).await.unwrap();
        let kept = store.create_chat(None, four_stages()).await.unwrap();

        for stage in doomed.stages.iter().chain(kept.stages.iter()) {
            store
                .append_message(stage.id, Role::User, format!("note for {}", stage.id))
                .await
                .unwrap();
        }

        store.delete_chat(doomed.chat.id).await.unwrap();

        assert!(matches!(
            store.get_chat(doomed.chat.id).await,
            Err(Error::NotFound { kind: "chat", .. })
        ));
        assert!(store.list_stages(doomed.chat.id).await.is_err());
        for stage in &doomed.stages {
            assert!(store.get_stage(stage.id).await.is_err());
            assert!(store.list_messages(stage.id).await.is_err());
        }

        assert_eq!(store.list_stages(kept.chat.id).await.unwrap().len(), 4);
        for stage in &kept.stages {
            assert_eq!(store.list_messages(stage.id).await.unwrap().len(), 1);
        }

        let err = store.delete_chat(doomed.chat.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "chat", .. }));
    }

    pub async fn chat_update_and_listing(store: &dyn PipelineStore) {
        let a = store.create_chat(None, vec![]).await.unwrap();
        let b = store.create_chat(Some("b".to_string()), vec![]).await.unwrap();

        let renamed = store
            .update_chat(a.chat.id, Some("renamed".to_string()))
            .await
            .unwrap();
        assert_eq!(renamed.description.as_deref(), Some("renamed"));
        assert_eq!(renamed.created_at, a.chat.created_at);

        let mut ids: Vec<_> = store
            .list_chats()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![a.chat.id, b.chat.id]);

        assert!(store.update_chat(9_999, None).await.is_err());
    }
}
