use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::*;
use tracing::{debug, info};
use uuid::Uuid;

use super::key_entity::{self, Model as ProviderKey};
use super::{KeyPool, KeyPoolError, KeyScope, KeyStatus, NewProviderKey};
use crate::admission::AdmissionDecision;
use crate::identity::RequestIdentity;
use crate::storage::Db;

#[derive(Clone)]
pub struct SqliteKeyPool {
    pub(crate) db: Db,
}

impl SqliteKeyPool {
    pub async fn new(db: Db) -> Result<Self> {
        info!("Initializing provider key pool storage");

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS provider_keys (
                id TEXT PRIMARY KEY NOT NULL,
                provider TEXT NOT NULL,
                owner_scope TEXT NOT NULL,
                owner_id TEXT,
                secret TEXT NOT NULL,
                daily_limit INTEGER NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                usage_day TEXT NOT NULL,
                status TEXT NOT NULL,
                last_used_at TEXT,
                created_at TEXT NOT NULL
            )
            "#
            .to_owned(),
        ))
        .await?;

        Ok(Self { db })
    }

    /// Compare-and-increment against one key. The capacity check and the
    /// increment are a single conditional UPDATE, so concurrent
    /// reservations serialize in the store no matter how many gateway
    /// processes share it. A counter left over from a previous day is
    /// rolled to 1 instead of incremented.
    async fn try_reserve(&self, key_id: &str, today: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"
                UPDATE provider_keys
                   SET usage_count = CASE WHEN usage_day = ? THEN usage_count + 1 ELSE 1 END,
                       usage_day = ?,
                       last_used_at = ?
                 WHERE id = ?
                   AND status = 'active'
                   AND (usage_day <> ? OR usage_count < daily_limit)
                "#,
                [
                    today.into(),
                    today.into(),
                    now.into(),
                    key_id.into(),
                    today.into(),
                ],
            ))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch(&self, key_id: &str) -> Result<Option<ProviderKey>> {
        let key = key_entity::Entity::find_by_id(key_id.to_owned())
            .one(&self.db)
            .await?;
        Ok(key)
    }
}

#[async_trait]
impl KeyPool for SqliteKeyPool {
    async fn reserve(
        &self,
        identity: &RequestIdentity,
        decision: &AdmissionDecision,
        exclude: Option<&str>,
    ) -> Result<ProviderKey, KeyPoolError> {
        let now = Utc::now();
        let today = now.date_naive().to_string();

        // Premium callers spend their own credential before the shared
        // pool.
        if decision.is_premium_tier {
            if let Some(user_id) = &identity.user_id {
                let owned = key_entity::Entity::find()
                    .filter(key_entity::Column::OwnerScope.eq(KeyScope::User.as_str()))
                    .filter(key_entity::Column::OwnerId.eq(user_id.to_string()))
                    .filter(key_entity::Column::Status.eq(KeyStatus::Active.as_str()))
                    .all(&self.db)
                    .await
                    .map_err(anyhow::Error::from)?;

                for key in owned {
                    if Some(key.id.as_str()) == exclude || !key.has_capacity(&today) {
                        continue;
                    }
                    if self.try_reserve(&key.id, &today, now).await? {
                        debug!(key_id = %key.id, "reserved user-scoped key");
                        return self
                            .fetch(&key.id)
                            .await?
                            .ok_or_else(|| anyhow::anyhow!("reserved key vanished").into());
                    }
                }
            }
        }

        // Shared pool in ascending last-use order. SQLite sorts NULL
        // first, so never-used keys are picked before warm ones.
        let pool = key_entity::Entity::find()
            .filter(key_entity::Column::OwnerScope.eq(KeyScope::System.as_str()))
            .filter(key_entity::Column::Status.eq(KeyStatus::Active.as_str()))
            .order_by_asc(key_entity::Column::LastUsedAt)
            .all(&self.db)
            .await
            .map_err(anyhow::Error::from)?;

        for key in pool {
            if Some(key.id.as_str()) == exclude || !key.has_capacity(&today) {
                continue;
            }
            if self.try_reserve(&key.id, &today, now).await? {
                debug!(key_id = %key.id, "reserved system pool key");
                return self
                    .fetch(&key.id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("reserved key vanished").into());
            }
        }

        Err(KeyPoolError::Exhausted)
    }

    async fn create(&self, key: NewProviderKey) -> Result<ProviderKey> {
        let now = Utc::now();
        let model = ProviderKey {
            id: Uuid::new_v4().to_string(),
            provider: key.provider.as_str().to_string(),
            owner_scope: key.scope.as_str().to_string(),
            owner_id: key.owner_id,
            secret: key.secret,
            daily_limit: key.daily_limit,
            usage_count: 0,
            usage_day: now.date_naive().to_string(),
            status: KeyStatus::Active.as_str().to_string(),
            last_used_at: None,
            created_at: now,
        };

        key_entity::Entity::insert(key_entity::ActiveModel {
            id: Set(model.id.clone()),
            provider: Set(model.provider.clone()),
            owner_scope: Set(model.owner_scope.clone()),
            owner_id: Set(model.owner_id.clone()),
            secret: Set(model.secret.clone()),
            daily_limit: Set(model.daily_limit),
            usage_count: Set(model.usage_count),
            usage_day: Set(model.usage_day.clone()),
            status: Set(model.status.clone()),
            last_used_at: Set(model.last_used_at),
            created_at: Set(model.created_at),
        })
        .exec(&self.db)
        .await?;

        Ok(model)
    }

    async fn list(&self) -> Result<Vec<ProviderKey>> {
        let keys = key_entity::Entity::find()
            .order_by_asc(key_entity::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(keys)
    }

    async fn update_status(&self, id: &str, status: KeyStatus) -> Result<()> {
        key_entity::Entity::update_many()
            .filter(key_entity::Column::Id.eq(id))
            .set(key_entity::ActiveModel {
                status: Set(status.as_str().to_string()),
                ..Default::default()
            })
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
