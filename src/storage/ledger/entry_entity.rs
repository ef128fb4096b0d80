use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_ledger")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Quota bucket the attempt is charged to (`user:` / `anon:` / `ip:`).
    pub bucket: String,
    pub user_id: Option<String>,
    pub session_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub analysis_type: String,
    pub outcome: String,
    pub error_kind: Option<String>,
    pub key_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_success(&self) -> bool {
        self.outcome == "success"
    }
}
