pub mod db;
pub mod memory;
pub mod model;
pub mod store;

pub use db::PipelineDb;
pub use memory::MemoryStore;

pub use model::{
    Chat, ChatId, ChatWithStages, Message, MessageId, NewStage, Role, Stage, StageId,
    StageStatus, StageUpdate,
};
pub use store::{ChatStore, MessageStore, PipelineStore, StageStore};
