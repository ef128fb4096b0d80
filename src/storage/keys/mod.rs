mod key_entity;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use key_entity::Model as ProviderKey;
pub use sqlite::SqliteKeyPool;

use crate::admission::AdmissionDecision;
use crate::identity::RequestIdentity;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Openai,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::Openai),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(anyhow::anyhow!("unknown provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    System,
    User,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::System => "system",
            KeyScope::User => "user",
        }
    }
}

impl FromStr for KeyScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(KeyScope::System),
            "user" => Ok(KeyScope::User),
            other => Err(anyhow::anyhow!("unknown key scope: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Inactive,
    Expired,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Inactive => "inactive",
            KeyStatus::Expired => "expired",
        }
    }
}

impl FromStr for KeyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "inactive" => Ok(KeyStatus::Inactive),
            "expired" => Ok(KeyStatus::Expired),
            other => Err(anyhow::anyhow!("unknown key status: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyPoolError {
    /// No active key with spare capacity qualifies for this request.
    #[error("no provider key with spare capacity")]
    Exhausted,
    #[error("key store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Fields an operator supplies when adding a credential to the pool.
#[derive(Debug, Clone)]
pub struct NewProviderKey {
    pub provider: Provider,
    pub scope: KeyScope,
    pub owner_id: Option<String>,
    pub secret: String,
    pub daily_limit: i64,
}

/// The credential pool. `reserve` is the only mutator on the hot path and
/// must be atomic with respect to the capacity check: two concurrent
/// reservations against the same key must never both pass a check that
/// only one of them should pass.
#[async_trait]
pub trait KeyPool: Send + Sync + 'static {
    /// Select a usable key and consume one unit of its daily capacity.
    /// Premium callers get their own user-scoped key first, then the
    /// system pool in ascending last-use order (never-used keys first).
    /// `exclude` lets a retry avoid the credential that just failed.
    async fn reserve(
        &self,
        identity: &RequestIdentity,
        decision: &AdmissionDecision,
        exclude: Option<&str>,
    ) -> Result<ProviderKey, KeyPoolError>;

    async fn create(&self, key: NewProviderKey) -> Result<ProviderKey>;
    async fn list(&self) -> Result<Vec<ProviderKey>>;
    async fn update_status(&self, id: &str, status: KeyStatus) -> Result<()>;
}
