use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::*;
use sea_query::OnConflict;
use tracing::info;
use uuid::Uuid;

use crate::storage::Db;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub plan: String,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Tier lookup for the quota evaluator. Part of the backing store; the
/// administrative surface that writes subscriptions lives elsewhere.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    async fn is_premium(&self, user_id: &Uuid) -> Result<bool>;
    async fn upsert(&self, user_id: &Uuid, plan: &str, expires_at: Option<DateTime<Utc>>)
        -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    db: Db,
}

impl SqliteSubscriptionStore {
    pub async fn new(db: Db) -> Result<Self> {
        info!("Initializing subscription storage");

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id TEXT PRIMARY KEY NOT NULL,
                plan TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL
            )
            "#
            .to_owned(),
        ))
        .await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn is_premium(&self, user_id: &Uuid) -> Result<bool> {
        let row = Entity::find_by_id(user_id.to_string()).one(&self.db).await?;
        let Some(sub) = row else {
            return Ok(false);
        };
        if sub.status != "active" {
            return Ok(false);
        }
        match sub.expires_at {
            Some(expires_at) => Ok(expires_at > Utc::now()),
            None => Ok(true),
        }
    }

    async fn upsert(
        &self,
        user_id: &Uuid,
        plan: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let model = ActiveModel {
            user_id: Set(user_id.to_string()),
            plan: Set(plan.to_string()),
            status: Set("active".to_string()),
            expires_at: Set(expires_at),
            created_at: Set(Utc::now()),
        };

        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::UserId)
                    .update_columns([Column::Plan, Column::Status, Column::ExpiresAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_db;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    async fn setup_store() -> (SqliteSubscriptionStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
        let db = init_db(&db_url).await.unwrap();
        let store = SqliteSubscriptionStore::new(db).await.unwrap();
        (store, temp_file)
    }

    #[tokio::test]
    async fn unknown_user_is_not_premium() {
        let (store, _tmp) = setup_store().await;
        assert!(!store.is_premium(&Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn active_subscription_is_premium() {
        let (store, _tmp) = setup_store().await;
        let user_id = Uuid::new_v4();
        store
            .upsert(&user_id, "premium", Some(Utc::now() + Duration::days(30)))
            .await
            .unwrap();
        assert!(store.is_premium(&user_id).await.unwrap());
    }

    #[tokio::test]
    async fn expired_subscription_is_not_premium() {
        let (store, _tmp) = setup_store().await;
        let user_id = Uuid::new_v4();
        store
            .upsert(&user_id, "premium", Some(Utc::now() - Duration::days(1)))
            .await
            .unwrap();
        assert!(!store.is_premium(&user_id).await.unwrap());
    }

    #[tokio::test]
    async fn open_ended_subscription_is_premium() {
        let (store, _tmp) = setup_store().await;
        let user_id = Uuid::new_v4();
        store.upsert(&user_id, "premium", None).await.unwrap();
        assert!(store.is_premium(&user_id).await.unwrap());
    }
}
