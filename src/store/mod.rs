//! Persistence for transfers and balances. An explicit handle constructed
//! at startup and threaded through the backfill engine and tailer — no
//! module-level singleton connection.

use bigdecimal::BigDecimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::domain::{Balance, Transfer, NULL_ADDRESS};
use crate::error::StoreError;

const INSERT_CHUNK_SIZE: usize = 1_000;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> eyre::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> eyre::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Bulk-inserts transfers. No deduplication by `(tx_hash, log_index)` —
    /// the caller (truncate-then-scan in the Backfill Engine) is
    /// responsible for not re-submitting.
    pub async fn insert_transfers(&self, transfers: &[Transfer]) -> Result<(), StoreError> {
        if transfers.is_empty() {
            return Ok(());
        }

        for chunk in transfers.chunks(INSERT_CHUNK_SIZE) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO transfers (chain_id, block_num, tx_hash, tx_from, tx_to, value, \
                 type, token_address, block_time) ",
            );

            qb.push_values(chunk, |mut b, t| {
                b.push_bind(t.chain_id)
                    .push_bind(t.block_num as i64)
                    .push_bind(&t.tx_hash)
                    .push_bind(&t.tx_from)
                    .push_bind(&t.tx_to)
                    .push_bind(&t.value)
                    .push_bind(t.r#type)
                    .push_bind(&t.token_address)
                    .push_bind(t.block_time);
            });

            qb.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Bulk-inserts balances. Used only after [`Store::delete_token_balances`]
    /// as part of a Backfill snapshot.
    pub async fn insert_balances(
        &self,
        chain_id: i64,
        balances: &[Balance],
    ) -> Result<(), StoreError> {
        if balances.is_empty() {
            return Ok(());
        }

        for chunk in balances.chunks(INSERT_CHUNK_SIZE) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO balances (chain_id, wallet_address, token_address, balance) ",
            );

            qb.push_values(chunk, |mut b, bal| {
                b.push_bind(chain_id)
                    .push_bind(&bal.wallet_address)
                    .push_bind(&bal.token_address)
                    .push_bind(&bal.balance);
            });

            qb.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Reads the balance row under a row lock and adds `delta`, inserting a
    /// new row with `balance = delta` if none exists. Runs inside `tx`,
    /// which the caller commits. A no-op for the null address: mints/burns
    /// never create a holder row for it.
    async fn increment_balance_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        chain_id: i64,
        token_address: &str,
        wallet_address: &str,
        delta: &BigDecimal,
    ) -> Result<(), StoreError> {
        if wallet_address == NULL_ADDRESS {
            return Ok(());
        }

        let existing: Option<(BigDecimal,)> = sqlx::query_as(
            "SELECT balance FROM balances \
             WHERE chain_id = $1 AND token_address = $2 AND wallet_address = $3 \
             FOR UPDATE",
        )
        .bind(chain_id)
        .bind(token_address)
        .bind(wallet_address)
        .fetch_optional(&mut **tx)
        .await?;

        match existing {
            Some((current,)) => {
                let next = current + delta;
                sqlx::query(
                    "UPDATE balances SET balance = $1, updated_at = now() \
                     WHERE chain_id = $2 AND token_address = $3 AND wallet_address = $4",
                )
                .bind(next)
                .bind(chain_id)
                .bind(token_address)
                .bind(wallet_address)
                .execute(&mut **tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO balances (chain_id, wallet_address, token_address, balance) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(chain_id)
                .bind(wallet_address)
                .bind(token_address)
                .bind(delta)
                .execute(&mut **tx)
                .await?;
            }
        }

        Ok(())
    }

    /// Appends a single transfer and applies both balance increments in one
    /// transaction: all three writes commit together or none do. This is
    /// the Tailer's sole write path.
    pub async fn apply_transfer(&self, transfer: &Transfer) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO transfers (chain_id, block_num, tx_hash, tx_from, tx_to, value, \
             type, token_address, block_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(transfer.chain_id)
        .bind(transfer.block_num as i64)
        .bind(&transfer.tx_hash)
        .bind(&transfer.tx_from)
        .bind(&transfer.tx_to)
        .bind(&transfer.value)
        .bind(transfer.r#type)
        .bind(&transfer.token_address)
        .bind(transfer.block_time)
        .execute(&mut *tx)
        .await?;

        Self::increment_balance_tx(
            &mut tx,
            transfer.chain_id,
            &transfer.token_address,
            &transfer.tx_to,
            &transfer.value,
        )
        .await?;

        Self::increment_balance_tx(
            &mut tx,
            transfer.chain_id,
            &transfer.token_address,
            &transfer.tx_from,
            &(-&transfer.value),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_token_balances(
        &self,
        chain_id: i64,
        token_address: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM balances WHERE chain_id = $1 AND token_address = $2")
            .bind(chain_id)
            .bind(token_address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_token_transfers(
        &self,
        chain_id: i64,
        token_address: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM transfers WHERE chain_id = $1 AND token_address = $2")
            .bind(chain_id)
            .bind(token_address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the top `limit` balances for `token_address`, ordered by
    /// balance descending.
    pub async fn top_holders(
        &self,
        chain_id: i64,
        token_address: &str,
        limit: i64,
    ) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query(
            "SELECT wallet_address, token_address, balance FROM balances \
             WHERE chain_id = $1 AND token_address = $2 \
             ORDER BY balance DESC LIMIT $3",
        )
        .bind(chain_id)
        .bind(token_address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Balance {
                chain_id,
                wallet_address: row.get("wallet_address"),
                token_address: row.get("token_address"),
                balance: row.get("balance"),
            })
            .collect())
    }
}
