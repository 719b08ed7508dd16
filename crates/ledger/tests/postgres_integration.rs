//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{GameId, RoundId, SessionId};
use domain::{Money, Spin, SpinType, WagerSplit};
use ledger::{LedgerError, LedgerStore, LedgerStoreExt, PostgresLedgerStore};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_ledger_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE spins, rounds")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedgerStore::new(pool)
}

fn place_spin(round_id: RoundId, tx: &str, real: i64, bonus: i64) -> Spin {
    Spin::place(
        round_id,
        tx,
        Money::from_minor(real + bonus),
        WagerSplit::new(Money::from_minor(real), Money::from_minor(bonus)),
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn test_round_upsert_returns_existing_row() {
    let store = get_test_store().await;
    let session = SessionId::new();
    let game = GameId::new();

    let first = store.find_or_create_round(session, game, "r-1").await.unwrap();
    let second = store.find_or_create_round(session, game, "r-1").await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(!second.finished);
}

#[tokio::test]
async fn test_concurrent_round_upserts_create_one_row() {
    let store = get_test_store().await;
    let session = SessionId::new();
    let game = GameId::new();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.find_or_create_round(session, game, "r-1").await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rounds WHERE session_id = $1")
        .bind(session.as_uuid())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_save_spin_roundtrip_and_idempotency() {
    let store = get_test_store().await;
    let round = store
        .find_or_create_round(SessionId::new(), GameId::new(), "r-1")
        .await
        .unwrap();

    let saved = store
        .save_spin(place_spin(round.id, "tx-1", 7, 3))
        .await
        .unwrap();
    assert_eq!(saved.real_amount, Money::from_minor(7));
    assert_eq!(saved.bonus_amount, Money::from_minor(3));

    let replayed = store
        .save_spin(place_spin(round.id, "tx-1", 7, 3))
        .await
        .unwrap();
    assert_eq!(replayed.id, saved.id);

    let spins = store.find_spins_by_round_id(round.id).await.unwrap();
    assert_eq!(spins.len(), 1);
}

#[tokio::test]
async fn test_same_transaction_in_two_sessions_saves_two_spins() {
    let store = get_test_store().await;
    let game = GameId::new();
    let first = store
        .find_or_create_round(SessionId::new(), game, "r-1")
        .await
        .unwrap();
    let second = store
        .find_or_create_round(SessionId::new(), game, "r-1")
        .await
        .unwrap();

    let a = store
        .save_spin(place_spin(first.id, "12345", 40, 0))
        .await
        .unwrap();
    let b = store
        .save_spin(place_spin(second.id, "12345", 40, 0))
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(b.round_id, second.id);
    assert_eq!(
        store
            .find_place_spin_by_round_id(second.id)
            .await
            .unwrap()
            .map(|s| s.id),
        Some(b.id)
    );
}

#[tokio::test]
async fn test_second_place_spin_is_rejected() {
    let store = get_test_store().await;
    let round = store
        .find_or_create_round(SessionId::new(), GameId::new(), "r-1")
        .await
        .unwrap();

    store
        .save_spin(place_spin(round.id, "tx-1", 10, 0))
        .await
        .unwrap();
    let result = store.save_spin(place_spin(round.id, "tx-2", 10, 0)).await;

    match result {
        Err(LedgerError::DuplicatePlaceSpin {
            existing_transaction,
            ..
        }) => assert_eq!(existing_transaction, "tx-1"),
        other => panic!("expected DuplicatePlaceSpin, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rollback_references_place_spin() {
    let store = get_test_store().await;
    let session = SessionId::new();
    let round = store
        .find_or_create_round(session, GameId::new(), "r-1")
        .await
        .unwrap();
    let place = store
        .save_spin(place_spin(round.id, "tx-1", 10, 0))
        .await
        .unwrap();

    let rollback = store
        .save_spin(Spin::rollback(&place, "tx-2"))
        .await
        .unwrap();
    assert_eq!(rollback.spin_type, SpinType::Rollback);

    let found = store
        .find_spin_referencing(round.id, place.id, SpinType::Rollback)
        .await
        .unwrap();
    assert_eq!(found.map(|s| s.id), Some(rollback.id));
}

#[tokio::test]
async fn test_reference_from_other_round_is_rejected() {
    let store = get_test_store().await;
    let session = SessionId::new();
    let game = GameId::new();
    let round_a = store.find_or_create_round(session, game, "a").await.unwrap();
    let round_b = store.find_or_create_round(session, game, "b").await.unwrap();

    let place_a = store
        .save_spin(place_spin(round_a.id, "tx-a", 10, 0))
        .await
        .unwrap();

    let mut foreign = Spin::rollback(&place_a, "tx-b");
    foreign.round_id = round_b.id;

    let result = store.save_spin(foreign).await;
    assert!(matches!(result, Err(LedgerError::ReferenceNotFound { .. })));
}

#[tokio::test]
async fn test_combined_lookup_joins_place_spin() {
    let store = get_test_store().await;
    let session = SessionId::new();
    let round = store
        .find_or_create_round(session, GameId::new(), "r-1")
        .await
        .unwrap();

    let (found, place) = store
        .find_round_with_place_spin(session, "r-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, round.id);
    assert!(place.is_none());

    let saved = store
        .save_spin(place_spin(round.id, "tx-1", 0, 10))
        .await
        .unwrap();
    let (_, place) = store
        .find_round_with_place_spin(session, "r-1")
        .await
        .unwrap()
        .unwrap();
    let place = place.unwrap();
    assert_eq!(place.id, saved.id);
    assert_eq!(place.bonus_amount, Money::from_minor(10));

    assert!(
        store
            .find_round_with_place_spin(session, "missing")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_finish_round_keeps_first_timestamp() {
    let store = get_test_store().await;
    let round = store
        .find_or_create_round(SessionId::new(), GameId::new(), "r-1")
        .await
        .unwrap();

    let first = store.finish_round(round.id, Utc::now()).await.unwrap();
    assert!(first.finished);

    let second = store
        .finish_round(round.id, Utc::now() + chrono::Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(second.finished_at, first.finished_at);

    let missing = store.finish_round(RoundId::new(), Utc::now()).await;
    assert!(matches!(missing, Err(LedgerError::RoundNotFound(_))));
}
