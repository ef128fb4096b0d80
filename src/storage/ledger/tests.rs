use super::*;
use crate::error::ErrorKind;
use crate::identity::RequestIdentity;
use crate::storage::init_db;
use crate::vision::AnalysisType;
use chrono::{Duration, Utc};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use tempfile::NamedTempFile;
use uuid::Uuid;

async fn setup_ledger() -> (SqliteUsageLedger, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let db = init_db(&db_url).await.unwrap();
    let ledger = SqliteUsageLedger::new(db).await.unwrap();
    (ledger, temp_file)
}

fn identity(fingerprint: &str) -> RequestIdentity {
    RequestIdentity {
        user_id: None,
        session_fingerprint: fingerprint.to_string(),
        ip_address: "203.0.113.1".to_string(),
        user_agent: "tests".to_string(),
    }
}

fn attempt(fingerprint: &str, outcome: AttemptOutcome, error_kind: Option<ErrorKind>) -> AttemptRecord {
    AttemptRecord {
        identity: identity(fingerprint),
        analysis_type: AnalysisType::Species,
        outcome,
        error_kind,
        key_id: None,
    }
}

#[tokio::test]
async fn successes_and_failures_both_count() {
    let (ledger, _tmp) = setup_ledger().await;
    let since = Utc::now() - Duration::hours(24);

    ledger
        .record(attempt("fp-a", AttemptOutcome::Success, None))
        .await
        .unwrap();
    ledger
        .record(attempt("fp-a", AttemptOutcome::Failure, Some(ErrorKind::Network)))
        .await
        .unwrap();
    ledger
        .record(attempt("fp-other", AttemptOutcome::Success, None))
        .await
        .unwrap();

    assert_eq!(ledger.count_since("anon:fp-a", since).await.unwrap(), 2);
    assert_eq!(ledger.count_since("anon:fp-other", since).await.unwrap(), 1);
    assert_eq!(ledger.count_since("anon:fp-none", since).await.unwrap(), 0);
}

#[tokio::test]
async fn entries_outside_the_window_are_ignored() {
    let (ledger, _tmp) = setup_ledger().await;
    ledger
        .record(attempt("fp-a", AttemptOutcome::Success, None))
        .await
        .unwrap();

    // Age the row past the window.
    ledger
        .db
        .execute(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "UPDATE usage_ledger SET created_at = ?",
            [(Utc::now() - Duration::hours(30)).into()],
        ))
        .await
        .unwrap();

    let since = Utc::now() - Duration::hours(24);
    assert_eq!(ledger.count_since("anon:fp-a", since).await.unwrap(), 0);
    assert!(ledger.latest_since("anon:fp-a", since).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_since_returns_the_newest_attempt() {
    let (ledger, _tmp) = setup_ledger().await;
    let since = Utc::now() - Duration::hours(1);

    ledger
        .record(attempt("fp-a", AttemptOutcome::Failure, Some(ErrorKind::ApiQuota)))
        .await
        .unwrap();
    ledger
        .record(attempt("fp-a", AttemptOutcome::Success, None))
        .await
        .unwrap();

    let newest = ledger.latest_since("anon:fp-a", since).await.unwrap().unwrap();
    assert!(newest <= Utc::now());
    assert!(newest >= since);
}

#[tokio::test]
async fn user_bucket_is_separate_from_fingerprint_bucket() {
    let (ledger, _tmp) = setup_ledger().await;
    let user_id = Uuid::new_v4();
    let since = Utc::now() - Duration::hours(24);

    let mut signed_in = identity("fp-shared");
    signed_in.user_id = Some(user_id);
    ledger
        .record(AttemptRecord {
            identity: signed_in,
            analysis_type: AnalysisType::Both,
            outcome: AttemptOutcome::Success,
            error_kind: None,
            key_id: Some("key-1".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(
        ledger
            .count_since(&format!("user:{}", user_id), since)
            .await
            .unwrap(),
        1
    );
    assert_eq!(ledger.count_since("anon:fp-shared", since).await.unwrap(), 0);
}
