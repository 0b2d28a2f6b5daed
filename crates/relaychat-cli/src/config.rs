use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::conversation::{DEFAULT_MAX_CONVERSATIONS, DEFAULT_TITLE_LENGTH};
use crate::error::CliResult;

/// Client configuration; shares a file with the server, which ignores these sections
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    /// Base URL of the relay server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Where history and remembered sessions are kept (default: ~/.relaychat)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Model requested when `--model` is not given; the server default applies otherwise
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_dir: None,
            default_model: None,
        }
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a session without "remember me", in minutes
    #[serde(default = "default_short_ttl_mins")]
    pub short_ttl_mins: i64,
    /// Lifetime of a remembered session, in hours
    #[serde(default = "default_long_ttl_hours")]
    pub long_ttl_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            short_ttl_mins: default_short_ttl_mins(),
            long_ttl_hours: default_long_ttl_hours(),
        }
    }
}

fn default_short_ttl_mins() -> i64 {
    60
}

fn default_long_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    /// Characters of the first message used as a conversation title
    #[serde(default = "default_title_length")]
    pub title_length: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            title_length: default_title_length(),
        }
    }
}

fn default_max_conversations() -> usize {
    DEFAULT_MAX_CONVERSATIONS
}

fn default_title_length() -> usize {
    DEFAULT_TITLE_LENGTH
}

impl ClientConfig {
    /// Load from `path`, or the first existing default location, or defaults
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".relaychat").join("config.toml")),
            dirs::config_dir().map(|c| c.join("relaychat").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::read(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn read(path: &Path) -> CliResult<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            format!("Failed to read config file {}: {e}", path.display())
        })?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config: {e}").into())
    }

    /// Durable data directory: flag, then config, then `~/.relaychat`
    pub fn data_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.client.data_dir.clone())
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".relaychat"))
                    .unwrap_or_else(|| PathBuf::from(".relaychat"))
            })
    }
}
