pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod supervisor;

pub use archive::SessionArchiver;
pub use cache::CacheClient;
pub use config::AgriChatConfig;
pub use error::AgriChatError;
pub use supervisor::{
    create_responder, AgentCategory, AnalysisResult, ChatResponder, OfflineResponder,
    PersonaClient, SupervisorClient, SupervisorError, SupportingInfo, FALLBACK_FEEDBACK,
};
