//! Local session gate
//!
//! A session record is written by `login` and checked before every command
//! that talks to the relay. "Remember me" sessions go to durable storage
//! and live for the long TTL; others go to ephemeral storage and live for
//! the short TTL. Expired or unreadable records are cleared on sight.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::CliResult;
use crate::persistence::SharedStore;

/// Key of the session record in both stores
pub const SESSION_KEY: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Rate-limit and history scoping key
    pub identity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// Long TTL and durable storage when set
    #[serde(default)]
    pub extended_ttl: bool,
}

/// How long sessions stay valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub short_ttl: TimeDelta,
    pub long_ttl: TimeDelta,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            short_ttl: TimeDelta::minutes(60),
            long_ttl: TimeDelta::hours(24),
        }
    }
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        let defaults = Self::default();
        Self {
            short_ttl: TimeDelta::try_minutes(config.short_ttl_mins).unwrap_or(defaults.short_ttl),
            long_ttl: TimeDelta::try_hours(config.long_ttl_hours).unwrap_or(defaults.long_ttl),
        }
    }

    pub fn ttl_for(&self, record: &SessionRecord) -> TimeDelta {
        if record.extended_ttl {
            self.long_ttl
        } else {
            self.short_ttl
        }
    }

    /// True once `ttl` has fully elapsed since the record was issued
    pub fn is_expired(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.issued_at >= self.ttl_for(record)
    }

    pub fn expires_at(&self, record: &SessionRecord) -> DateTime<Utc> {
        record.issued_at + self.ttl_for(record)
    }
}

/// Result of a session check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Valid(SessionRecord),
    Expired,
    Absent,
}

impl SessionStatus {
    pub fn identity(&self) -> Option<&str> {
        match self {
            SessionStatus::Valid(record) => Some(&record.identity_id),
            _ => None,
        }
    }
}

pub struct SessionGate {
    durable: SharedStore,
    ephemeral: SharedStore,
    policy: SessionPolicy,
}

impl SessionGate {
    pub fn new(durable: SharedStore, ephemeral: SharedStore, policy: SessionPolicy) -> Self {
        Self {
            durable,
            ephemeral,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub async fn validate(&self) -> CliResult<SessionStatus> {
        self.validate_at(Utc::now()).await
    }

    /// Check the stored session at `now`, clearing it if expired
    ///
    /// The durable record takes precedence over the ephemeral one.
    pub async fn validate_at(&self, now: DateTime<Utc>) -> CliResult<SessionStatus> {
        let raw = match self.durable.get(SESSION_KEY).await? {
            Some(raw) => raw,
            None => match self.ephemeral.get(SESSION_KEY).await? {
                Some(raw) => raw,
                None => return Ok(SessionStatus::Absent),
            },
        };

        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session record");
                self.clear().await?;
                return Ok(SessionStatus::Absent);
            }
        };

        if self.policy.is_expired(&record, now) {
            tracing::info!(
                identity = %record.identity_id,
                issued_at = %record.issued_at,
                "Session expired"
            );
            self.clear().await?;
            return Ok(SessionStatus::Expired);
        }

        Ok(SessionStatus::Valid(record))
    }

    pub async fn login(
        &self,
        identity_id: &str,
        display_name: Option<String>,
        extended_ttl: bool,
    ) -> CliResult<SessionRecord> {
        self.login_at(identity_id, display_name, extended_ttl, Utc::now())
            .await
    }

    /// Write a fresh session record, replacing any existing one
    pub async fn login_at(
        &self,
        identity_id: &str,
        display_name: Option<String>,
        extended_ttl: bool,
        now: DateTime<Utc>,
    ) -> CliResult<SessionRecord> {
        let identity_id = identity_id.trim();
        if identity_id.is_empty() {
            return Err("Identity must not be empty".into());
        }

        let record = SessionRecord {
            identity_id: identity_id.to_string(),
            display_name,
            issued_at: now,
            extended_ttl,
        };
        let raw = serde_json::to_string(&record)?;

        self.clear().await?;
        let target = if extended_ttl {
            &self.durable
        } else {
            &self.ephemeral
        };
        target.set(SESSION_KEY, &raw).await?;

        tracing::debug!(identity = %record.identity_id, extended_ttl, "Session started");
        Ok(record)
    }

    /// Remove the session from both stores
    pub async fn logout(&self) -> CliResult<()> {
        self.clear().await
    }

    async fn clear(&self) -> CliResult<()> {
        self.durable.remove(SESSION_KEY).await?;
        self.ephemeral.remove(SESSION_KEY).await?;
        Ok(())
    }
}
