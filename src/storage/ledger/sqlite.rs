use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::*;
use tracing::info;
use uuid::Uuid;

use super::entry_entity;
use super::{AttemptRecord, UsageLedger};
use crate::storage::Db;

#[derive(Clone)]
pub struct SqliteUsageLedger {
    pub(crate) db: Db,
}

impl SqliteUsageLedger {
    pub async fn new(db: Db) -> Result<Self> {
        info!("Initializing usage ledger storage");

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS usage_ledger (
                id TEXT PRIMARY KEY NOT NULL,
                bucket TEXT NOT NULL,
                user_id TEXT,
                session_fingerprint TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                analysis_type TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                key_id TEXT,
                created_at TEXT NOT NULL
            )
            "#
            .to_owned(),
        ))
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_usage_ledger_bucket_time
                 ON usage_ledger (bucket, created_at)"
                .to_owned(),
        ))
        .await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl UsageLedger for SqliteUsageLedger {
    async fn record(&self, attempt: AttemptRecord) -> Result<()> {
        let entry = entry_entity::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            bucket: Set(attempt.identity.bucket()),
            user_id: Set(attempt.identity.user_id.map(|id| id.to_string())),
            session_fingerprint: Set(attempt.identity.session_fingerprint.clone()),
            ip_address: Set(attempt.identity.ip_address.clone()),
            user_agent: Set(attempt.identity.user_agent.clone()),
            analysis_type: Set(attempt.analysis_type.as_str().to_string()),
            outcome: Set(attempt.outcome.as_str().to_string()),
            error_kind: Set(attempt.error_kind.map(|kind| kind.as_str().to_string())),
            key_id: Set(attempt.key_id),
            created_at: Set(Utc::now()),
        };

        entry_entity::Entity::insert(entry).exec(&self.db).await?;
        Ok(())
    }

    async fn count_since(&self, bucket: &str, since: DateTime<Utc>) -> Result<u64> {
        let count = entry_entity::Entity::find()
            .filter(entry_entity::Column::Bucket.eq(bucket))
            .filter(entry_entity::Column::CreatedAt.gte(since))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn latest_since(
        &self,
        bucket: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let newest = entry_entity::Entity::find()
            .filter(entry_entity::Column::Bucket.eq(bucket))
            .filter(entry_entity::Column::CreatedAt.gte(since))
            .order_by_desc(entry_entity::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(newest.map(|entry| entry.created_at))
    }
}
