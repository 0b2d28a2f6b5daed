pub mod client;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod output;
pub mod persistence;
pub mod session;

pub use client::{ModelInfo, RelayClient};
pub use commands::{
    AppContext, ChatCommand, HistoryCommand, LoginCommand, LogoutCommand, ModelsCommand,
    StatusCommand,
};
pub use config::ClientConfig;
pub use conversation::{Conversation, ConversationStore, ConversationTurn, Sender};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, truncate_string};
pub use persistence::{FileStore, KeyValueStore, MemoryStore, SharedStore};
pub use session::{SessionGate, SessionPolicy, SessionRecord, SessionStatus};
