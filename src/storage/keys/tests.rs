use super::*;
use crate::admission::AdmissionDecision;
use crate::identity::RequestIdentity;
use crate::storage::init_db;
use chrono::Utc;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::sync::Arc;
use tempfile::NamedTempFile;
use uuid::Uuid;

async fn setup_pool() -> (SqliteKeyPool, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let db = init_db(&db_url).await.unwrap();
    let pool = SqliteKeyPool::new(db).await.unwrap();
    (pool, temp_file)
}

fn identity(user_id: Option<Uuid>) -> RequestIdentity {
    RequestIdentity {
        user_id,
        session_fingerprint: "fp-test".to_string(),
        ip_address: "203.0.113.1".to_string(),
        user_agent: "tests".to_string(),
    }
}

fn allow(premium: bool) -> AdmissionDecision {
    AdmissionDecision::allow(premium)
}

fn new_key(provider: Provider, scope: KeyScope, owner: Option<String>, limit: i64) -> NewProviderKey {
    NewProviderKey {
        provider,
        scope,
        owner_id: owner,
        secret: "sk-test".to_string(),
        daily_limit: limit,
    }
}

#[tokio::test]
async fn reserve_increments_usage() {
    let (pool, _tmp) = setup_pool().await;
    pool.create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();

    let key = pool
        .reserve(&identity(None), &allow(false), None)
        .await
        .unwrap();
    assert_eq!(key.usage_count, 1);
    assert!(key.last_used_at.is_some());
}

#[tokio::test]
async fn premium_user_gets_their_own_key_first() {
    let (pool, _tmp) = setup_pool().await;
    let user_id = Uuid::new_v4();
    pool.create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();
    let owned = pool
        .create(new_key(
            Provider::Openai,
            KeyScope::User,
            Some(user_id.to_string()),
            10,
        ))
        .await
        .unwrap();

    let key = pool
        .reserve(&identity(Some(user_id)), &allow(true), None)
        .await
        .unwrap();
    assert_eq!(key.id, owned.id);
    assert_eq!(key.scope(), KeyScope::User);
}

#[tokio::test]
async fn user_keys_are_never_lent_to_other_callers() {
    let (pool, _tmp) = setup_pool().await;
    pool.create(new_key(
        Provider::Gemini,
        KeyScope::User,
        Some(Uuid::new_v4().to_string()),
        10,
    ))
    .await
    .unwrap();

    let err = pool.reserve(&identity(None), &allow(false), None).await;
    assert!(matches!(err, Err(KeyPoolError::Exhausted)));
}

#[tokio::test]
async fn never_used_keys_are_picked_before_warm_ones() {
    let (pool, _tmp) = setup_pool().await;
    let warm = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();
    pool.reserve(&identity(None), &allow(false), None)
        .await
        .unwrap();
    let fresh = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();

    let key = pool
        .reserve(&identity(None), &allow(false), None)
        .await
        .unwrap();
    assert_eq!(key.id, fresh.id);
    assert_ne!(key.id, warm.id);
}

#[tokio::test]
async fn inactive_keys_are_never_selected() {
    let (pool, _tmp) = setup_pool().await;
    let key = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();
    pool.update_status(&key.id, KeyStatus::Inactive).await.unwrap();

    let err = pool.reserve(&identity(None), &allow(false), None).await;
    assert!(matches!(err, Err(KeyPoolError::Exhausted)));
}

#[tokio::test]
async fn exhausted_premium_key_with_empty_pool_reports_exhaustion() {
    // The caller may be admitted and still find no usable credential.
    let (pool, _tmp) = setup_pool().await;
    let user_id = Uuid::new_v4();
    pool.create(new_key(
        Provider::Gemini,
        KeyScope::User,
        Some(user_id.to_string()),
        1,
    ))
    .await
    .unwrap();

    pool.reserve(&identity(Some(user_id)), &allow(true), None)
        .await
        .unwrap();
    let err = pool.reserve(&identity(Some(user_id)), &allow(true), None).await;
    assert!(matches!(err, Err(KeyPoolError::Exhausted)));
}

#[tokio::test]
async fn excluded_key_is_skipped() {
    let (pool, _tmp) = setup_pool().await;
    let first = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 10))
        .await
        .unwrap();
    let second = pool
        .create(new_key(Provider::Openai, KeyScope::System, None, 10))
        .await
        .unwrap();

    let key = pool
        .reserve(&identity(None), &allow(false), Some(&first.id))
        .await
        .unwrap();
    assert_eq!(key.id, second.id);
}

#[tokio::test]
async fn stale_day_counter_rolls_over_to_one() {
    let (pool, _tmp) = setup_pool().await;
    let key = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 3))
        .await
        .unwrap();

    // Pretend the key spent its whole budget yesterday.
    pool.db
        .execute(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "UPDATE provider_keys SET usage_count = 3, usage_day = ? WHERE id = ?",
            [
                (Utc::now().date_naive() - chrono::Duration::days(1))
                    .to_string()
                    .into(),
                key.id.clone().into(),
            ],
        ))
        .await
        .unwrap();

    let reserved = pool
        .reserve(&identity(None), &allow(false), None)
        .await
        .unwrap();
    assert_eq!(reserved.id, key.id);
    assert_eq!(reserved.usage_count, 1);
    assert_eq!(reserved.usage_day, Utc::now().date_naive().to_string());
}

#[tokio::test]
async fn concurrent_reservations_never_exceed_capacity() {
    // Fire N concurrent reservations at a pool with capacity K < N:
    // exactly K succeed and the counter stops at K.
    let (pool, _tmp) = setup_pool().await;
    let key = pool
        .create(new_key(Provider::Gemini, KeyScope::System, None, 3))
        .await
        .unwrap();

    let pool = Arc::new(pool);
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            pool.reserve(&identity(None), &allow(false), None).await
        }));
    }

    let results = futures::future::join_all(tasks).await;
    let granted = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(KeyPoolError::Exhausted))))
        .count();
    assert_eq!(granted, 3);
    assert_eq!(refused, 5);

    let stored = pool.list().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, key.id);
    assert_eq!(stored[0].usage_count, 3);
    assert!(stored[0].usage_count <= stored[0].daily_limit);
}
