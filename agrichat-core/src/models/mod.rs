pub mod knowledge;
pub mod message;
pub mod report;
pub mod session;

pub use knowledge::KnowledgeEntry;
pub use message::{ChatMessage, MessageRole};
pub use report::{DiagnosisReport, ReportPriority, ReportStatus};
pub use session::{ChatSession, SessionCategory, SessionStatus};
