mod entry_entity;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use entry_entity::Model as LedgerEntry;
pub use sqlite::SqliteUsageLedger;

use crate::error::ErrorKind;
use crate::identity::RequestIdentity;
use crate::vision::AnalysisType;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
        }
    }
}

/// One admission attempt, about to be appended. The identity is embedded
/// rather than referenced so ledger rows stand on their own.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub identity: RequestIdentity,
    pub analysis_type: AnalysisType,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<ErrorKind>,
    pub key_id: Option<String>,
}

/// Append-only record of admission attempts. The quota evaluator reads
/// it; the orchestrator writes it, exactly once per attempt.
#[async_trait]
pub trait UsageLedger: Send + Sync + 'static {
    async fn record(&self, attempt: AttemptRecord) -> Result<()>;

    /// Number of attempts (success and failure alike) charged to this
    /// bucket since `since`.
    async fn count_since(&self, bucket: &str, since: DateTime<Utc>) -> Result<u64>;

    /// Timestamp of the newest attempt in the window, if any.
    async fn latest_since(&self, bucket: &str, since: DateTime<Utc>)
        -> Result<Option<DateTime<Utc>>>;
}
