pub mod assistant;
pub mod config;
pub mod conversation;
pub mod error;
pub mod log;
pub mod map;
pub mod tools;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use assistant::{AssistantApi, OpenAiAssistants};
pub use config::{Config, PollSettings};
pub use conversation::{ensure_assistant, Conversation, PollerState, SessionStatus};
pub use error::{AssistantError, AssistantErrorKind, RunError, ToolError};
pub use log::{ConversationEntry, ConversationLog};
pub use map::{Coordinate, MapState, MapStore, MapView, Marker};
pub use tools::{MapTool, ToolRegistry};
