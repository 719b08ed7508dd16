use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GameId, RoundId, SessionId, SpinId};
use domain::{Money, Round, Spin, SpinType};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{LedgerError, Result, store::LedgerStore};

const ROUND_COLUMNS: &str = "id, session_id, game_id, ext_round_id, finished, created_at, finished_at";

const SPIN_COLUMNS: &str = "id, round_id, spin_type, amount, real_amount, bonus_amount, transaction_id, reference_id, free_spin_id, created_at";

/// PostgreSQL-backed ledger store implementation.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_round(row: &PgRow) -> Result<Round> {
        Ok(Round {
            id: RoundId::from_uuid(row.try_get::<Uuid, _>("id")?),
            session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
            game_id: GameId::from_uuid(row.try_get::<Uuid, _>("game_id")?),
            ext_round_id: row.try_get("ext_round_id")?,
            finished: row.try_get("finished")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    /// Maps a spin row. `prefix` selects aliased columns from a join.
    fn row_to_spin(row: &PgRow, prefix: &str) -> Result<Spin> {
        let col = |name: &str| format!("{prefix}{name}");
        let spin_type: String = row.try_get(col("spin_type").as_str())?;

        Ok(Spin {
            id: SpinId::from_uuid(row.try_get::<Uuid, _>(col("id").as_str())?),
            round_id: RoundId::from_uuid(row.try_get::<Uuid, _>(col("round_id").as_str())?),
            spin_type: spin_type.parse()?,
            amount: Money::from_minor(row.try_get(col("amount").as_str())?),
            real_amount: Money::from_minor(row.try_get(col("real_amount").as_str())?),
            bonus_amount: Money::from_minor(row.try_get(col("bonus_amount").as_str())?),
            transaction_id: row.try_get(col("transaction_id").as_str())?,
            reference_id: row
                .try_get::<Option<Uuid>, _>(col("reference_id").as_str())?
                .map(SpinId::from_uuid),
            free_spin_id: row.try_get(col("free_spin_id").as_str())?,
            created_at: row.try_get(col("created_at").as_str())?,
        })
    }

    async fn find_spin_by_transaction(
        &self,
        round_id: RoundId,
        transaction_id: &str,
        spin_type: SpinType,
    ) -> Result<Option<Spin>> {
        let row = sqlx::query(&format!(
            "SELECT {SPIN_COLUMNS} FROM spins \
             WHERE round_id = $1 AND transaction_id = $2 AND spin_type = $3"
        ))
        .bind(round_id.as_uuid())
        .bind(transaction_id)
        .bind(spin_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_spin(&r, "")).transpose()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn find_or_create_round(
        &self,
        session_id: SessionId,
        game_id: GameId,
        ext_round_id: &str,
    ) -> Result<Round> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO rounds (id, session_id, game_id, ext_round_id, finished, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            ON CONFLICT (session_id, ext_round_id) DO UPDATE SET
                ext_round_id = EXCLUDED.ext_round_id
            RETURNING {ROUND_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(session_id.as_uuid())
        .bind(game_id.as_uuid())
        .bind(ext_round_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_round(&row)
    }

    async fn find_round_by_ext_id(
        &self,
        session_id: SessionId,
        ext_round_id: &str,
    ) -> Result<Option<Round>> {
        let row = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE session_id = $1 AND ext_round_id = $2"
        ))
        .bind(session_id.as_uuid())
        .bind(ext_round_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_round(&r)).transpose()
    }

    async fn find_place_spin_by_round_id(&self, round_id: RoundId) -> Result<Option<Spin>> {
        let row = sqlx::query(&format!(
            "SELECT {SPIN_COLUMNS} FROM spins WHERE round_id = $1 AND spin_type = 'PLACE'"
        ))
        .bind(round_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_spin(&r, "")).transpose()
    }

    async fn find_spins_by_round_id(&self, round_id: RoundId) -> Result<Vec<Spin>> {
        let rows = sqlx::query(&format!(
            "SELECT {SPIN_COLUMNS} FROM spins WHERE round_id = $1 ORDER BY seq ASC"
        ))
        .bind(round_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| Self::row_to_spin(r, "")).collect()
    }

    async fn save_spin(&self, spin: Spin) -> Result<Spin> {
        let mut tx = self.pool.begin().await?;

        if let Some(reference_id) = spin.reference_id {
            let reference_round: Option<Uuid> =
                sqlx::query_scalar("SELECT round_id FROM spins WHERE id = $1")
                    .bind(reference_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            if reference_round != Some(spin.round_id.as_uuid()) {
                return Err(LedgerError::ReferenceNotFound {
                    round_id: spin.round_id,
                    reference_id,
                });
            }
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO spins (id, round_id, spin_type, amount, real_amount, bonus_amount,
                               transaction_id, reference_id, free_spin_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ON CONSTRAINT unique_spin_transaction DO NOTHING
            RETURNING {SPIN_COLUMNS}
            "#
        ))
        .bind(spin.id.as_uuid())
        .bind(spin.round_id.as_uuid())
        .bind(spin.spin_type.as_str())
        .bind(spin.amount.minor())
        .bind(spin.real_amount.minor())
        .bind(spin.bonus_amount.minor())
        .bind(&spin.transaction_id)
        .bind(spin.reference_id.map(|id| id.as_uuid()))
        .bind(&spin.free_spin_id)
        .bind(spin.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_round_place") => {
                        return LedgerError::DuplicatePlaceSpin {
                            round_id: spin.round_id,
                            existing_transaction: String::new(),
                        };
                    }
                    Some("spins_round_id_fkey") => {
                        return LedgerError::RoundNotFound(spin.round_id);
                    }
                    _ => {}
                }
            }
            LedgerError::Database(e)
        });

        let inserted = match inserted {
            Ok(row) => row,
            Err(LedgerError::DuplicatePlaceSpin { round_id, .. }) => {
                drop(tx);
                let existing = self
                    .find_place_spin_by_round_id(round_id)
                    .await?
                    .map(|s| s.transaction_id)
                    .unwrap_or_default();
                return Err(LedgerError::DuplicatePlaceSpin {
                    round_id,
                    existing_transaction: existing,
                });
            }
            Err(e) => return Err(e),
        };

        tx.commit().await?;

        match inserted {
            Some(row) => Self::row_to_spin(&row, ""),
            None => self
                .find_spin_by_transaction(spin.round_id, &spin.transaction_id, spin.spin_type)
                .await?
                .ok_or(LedgerError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn finish_round(&self, round_id: RoundId, finished_at: DateTime<Utc>) -> Result<Round> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE rounds
            SET finished = TRUE, finished_at = COALESCE(finished_at, $2)
            WHERE id = $1
            RETURNING {ROUND_COLUMNS}
            "#
        ))
        .bind(round_id.as_uuid())
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_round(&row),
            None => Err(LedgerError::RoundNotFound(round_id)),
        }
    }

    async fn find_round_with_place_spin(
        &self,
        session_id: SessionId,
        ext_round_id: &str,
    ) -> Result<Option<(Round, Option<Spin>)>> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.session_id, r.game_id, r.ext_round_id, r.finished, r.created_at,
                   r.finished_at,
                   s.id AS s_id, s.round_id AS s_round_id, s.spin_type AS s_spin_type,
                   s.amount AS s_amount, s.real_amount AS s_real_amount,
                   s.bonus_amount AS s_bonus_amount, s.transaction_id AS s_transaction_id,
                   s.reference_id AS s_reference_id, s.free_spin_id AS s_free_spin_id,
                   s.created_at AS s_created_at
            FROM rounds r
            LEFT JOIN spins s ON s.round_id = r.id AND s.spin_type = 'PLACE'
            WHERE r.session_id = $1 AND r.ext_round_id = $2
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(ext_round_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let round = Self::row_to_round(&row)?;
        let place = match row.try_get::<Option<Uuid>, _>("s_id")? {
            Some(_) => Some(Self::row_to_spin(&row, "s_")?),
            None => None,
        };
        Ok(Some((round, place)))
    }
}
