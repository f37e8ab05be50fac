#![cfg(feature = "db-tests")]
//! PostgreSQL store tests
//!
//! Run against the database configured through `LEXIS_DB_*`:
//! `cargo test -p lexis-api --features db-tests`

use chrono::Duration;
use lexis_api::{ApiResult, DbConfig, PgStore};
use lexis_core::{LexisError, NewUser, StorageError};
use lexis_storage::CardStore;
use lexis_test_utils::fixtures;

async fn test_store() -> ApiResult<PgStore> {
    let store = PgStore::from_config(&DbConfig::from_env())?;
    store.ensure_schema().await?;
    Ok(store)
}

/// Id range unlikely to collide with other runs against the same database.
fn unique_base() -> i64 {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    (nanos / 1_000) % 1_000_000_000_000
}

#[tokio::test]
async fn pg_card_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let store = test_store().await?;
    let base = unique_base();
    let words: Vec<_> = (1..=3).map(|n| fixtures::word(base + n)).collect();
    assert_eq!(store.word_upsert(&words).await?, 3);

    let now = fixtures::fixture_now();
    let user = NewUser::new(base);
    assert!(store.user_insert(&user, now).await?.is_created());
    assert!(!store.user_insert(&user, now).await?.is_created());

    store.card_insert(&fixtures::card(base, base + 1, 1, now)).await?;
    let duplicate = store.card_insert(&fixtures::card(base, base + 1, 1, now)).await;
    assert!(matches!(
        duplicate,
        Err(LexisError::Storage(StorageError::InsertFailed { .. }))
    ));

    let later = now + Duration::minutes(20);
    let bumped = store.card_increment_views(base, base + 1, later).await?;
    assert_eq!(bumped.count_of_views, 2);
    assert_eq!(bumped.last_view, later);

    let missing = store.card_increment_views(base, base + 2, later).await;
    assert!(matches!(
        missing,
        Err(LexisError::Storage(StorageError::NotFound { .. }))
    ));

    let after = store.word_list_after(base + 1, 10).await?;
    assert_eq!(after.first().map(|w| w.id), Some(base + 2));

    let by_ids = store.word_list_by_ids(&[base + 3, base + 1]).await?;
    assert_eq!(by_ids.iter().map(|w| w.id).collect::<Vec<_>>(), vec![base + 3, base + 1]);
    assert_eq!(by_ids[0].sentences.len(), 2);

    store.health_check().await?;
    Ok(())
}
