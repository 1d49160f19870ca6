pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod persona;
pub mod sheets;

pub use config::KissaConfig;
pub use engine::{
    DialogueEngine, DialogueSession, EngineError, GeminiChatClient, GeminiChatConfig,
};
pub use error::KissaError;
pub use models::{Conversation, Role};
pub use persona::END_OF_CONVERSATION;
pub use sheets::{
    ConversationExporter, GoogleSheetsExporter, NoopExporter, ServiceAccountKey, SheetsError,
};
