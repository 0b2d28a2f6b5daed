pub mod chat;
pub mod history;
pub mod models;
pub mod session;

pub use chat::ChatCommand;
pub use history::HistoryCommand;
pub use models::ModelsCommand;
pub use session::{LoginCommand, LogoutCommand, StatusCommand};

use crate::client::RelayClient;
use crate::config::ClientConfig;
use crate::conversation::ConversationStore;
use crate::error::CliResult;
use crate::persistence::SharedStore;
use crate::session::{SessionGate, SessionPolicy, SessionRecord, SessionStatus};

/// Everything a command needs: configuration, storage and the session gate
pub struct AppContext {
    pub config: ClientConfig,
    durable: SharedStore,
    gate: SessionGate,
}

impl AppContext {
    pub fn new(config: ClientConfig, durable: SharedStore, ephemeral: SharedStore) -> Self {
        let policy = SessionPolicy::from_config(&config.session);
        let gate = SessionGate::new(durable.clone(), ephemeral, policy);
        Self {
            config,
            durable,
            gate,
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// The current session, or an error telling the user to log in
    pub async fn require_session(&self) -> CliResult<SessionRecord> {
        match self.gate.validate().await? {
            SessionStatus::Valid(record) => Ok(record),
            SessionStatus::Expired => {
                Err("Session expired. Run `relaychat-cli login <identity>` to start a new one.".into())
            }
            SessionStatus::Absent => {
                Err("Not logged in. Run `relaychat-cli login <identity>` first.".into())
            }
        }
    }

    /// Conversation history of `identity`, kept in durable storage
    pub fn conversations(&self, identity: &str) -> ConversationStore {
        ConversationStore::new(self.durable.clone(), identity).with_limits(
            self.config.history.max_conversations,
            self.config.history.title_length,
        )
    }

    pub fn client(&self, identity: Option<&str>) -> CliResult<RelayClient> {
        let client = RelayClient::new(&self.config.client.server_url)?;
        Ok(match identity {
            Some(identity) => client.with_identity(identity),
            None => client,
        })
    }
}
