use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use super::{KeyScope, KeyStatus, Provider};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub provider: String,
    pub owner_scope: String,
    pub owner_id: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub secret: String,
    pub daily_limit: i64,
    pub usage_count: i64,
    /// Day bucket the counter belongs to; rolled over inside the
    /// reservation statement so the reset is owned by the store.
    pub usage_day: String,
    pub status: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn provider_kind(&self) -> Provider {
        self.provider.parse().unwrap_or(Provider::Gemini)
    }

    pub fn scope(&self) -> KeyScope {
        self.owner_scope.parse().unwrap_or(KeyScope::System)
    }

    pub fn key_status(&self) -> KeyStatus {
        self.status.parse().unwrap_or(KeyStatus::Inactive)
    }

    /// Spare capacity as of `today`. A counter from an earlier day has
    /// not been rolled over yet and counts as fully free.
    pub fn has_capacity(&self, today: &str) -> bool {
        self.usage_day != today || self.usage_count < self.daily_limit
    }
}
