pub mod keys;
pub mod ledger;
pub mod subscription;

use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

pub type Db = DatabaseConnection;

pub async fn init_db(database_url: &str) -> Result<Db> {
    info!("Connecting to database at {}", database_url);
    let db = Database::connect(
        ConnectOptions::new(database_url.to_owned())
            .sqlx_logging(false)
            .to_owned(),
    )
    .await?;
    Ok(db)
}

pub use keys::{KeyPool, ProviderKey, SqliteKeyPool};
pub use ledger::{SqliteUsageLedger, UsageLedger};
pub use subscription::{SqliteSubscriptionStore, SubscriptionStore};
