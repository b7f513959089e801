use crate::entities::DepositStatus;
use crate::framework::DatabaseProcessor;
use ethers::types::U256;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Deposit {
    pub id: i64,
    pub client_id: i64,
    pub addr_path: String,
    pub coin_symbol: String,
    pub tx_hash: String,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub fee_symbol: String,
    pub status: DepositStatus,
    pub detail: Json<DepositDetail>,
    pub created_at: time::PrimitiveDateTime,
}

/// Block metadata of a deposit plus the fields the sweep fills in later.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DepositDetail {
    pub block_hash: String,
    pub block_height: i64,
    pub sender: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    /// Transaction that funded the deposit address with gas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_tx_hash: Option<String>,
    /// Sweep transaction to the collection address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_tx_hash: Option<String>,
}

/// Data for inserting a new deposit.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositInsert {
    pub client_id: i64,
    pub addr_path: String,
    pub coin_symbol: String,
    pub tx_hash: String,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub fee_symbol: String,
    pub detail: DepositDetail,
}

const DEPOSIT_COLUMNS: &str = "id, client_id, addr_path, coin_symbol, tx_hash, amount, \
    fee_amount, fee_symbol, status, detail, created_at";

impl Deposit {
    /// Insert an unconfirmed deposit. Returns `None` when a deposit with the
    /// same `(coin_symbol, tx_hash)` already exists.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        insert: &DepositInsert,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO deposits
            (client_id, addr_path, coin_symbol, tx_hash, amount, fee_amount, fee_symbol, status, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'unconfirmed', $8)
            ON CONFLICT (coin_symbol, tx_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(insert.client_id)
        .bind(&insert.addr_path)
        .bind(&insert.coin_symbol)
        .bind(&insert.tx_hash)
        .bind(insert.amount)
        .bind(insert.fee_amount)
        .bind(&insert.fee_symbol)
        .bind(Json(&insert.detail))
        .fetch_optional(&mut **tx)
        .await
    }

    /// Lock the deposit row for the rest of the transaction and read it.
    pub async fn lock_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Option<Deposit>, sqlx::Error> {
        sqlx::query_as::<_, Deposit>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn set_status_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        status: DepositStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deposits SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_nonce_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        nonce: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deposits
            SET detail = jsonb_set(detail, '{nonce}', to_jsonb($2::bigint))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(nonce)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Record the sweep transaction and mark the deposit finished.
    pub async fn finish_collection_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        collect_tx_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'finished',
                detail = jsonb_set(detail, '{collect_tx_hash}', to_jsonb($2::text))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(collect_tx_hash)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DepositExists {
    pub coin_symbol: String,
    pub tx_hash: String,
}

impl Processor<DepositExists> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DepositExists")]
    async fn process(&self, query: DepositExists) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM deposits WHERE coin_symbol = $1 AND tx_hash = $2)",
        )
        .bind(&query.coin_symbol)
        .bind(&query.tx_hash)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetDeposit {
    pub id: i64,
}

impl Processor<GetDeposit> for DatabaseProcessor {
    type Output = Option<Deposit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDeposit")]
    async fn process(&self, query: GetDeposit) -> Result<Option<Deposit>, sqlx::Error> {
        sqlx::query_as::<_, Deposit>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Unconfirmed deposits of one asset, oldest first.
pub struct GetUnconfirmedDeposits {
    pub coin_symbol: String,
}

impl Processor<GetUnconfirmedDeposits> for DatabaseProcessor {
    type Output = Vec<Deposit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetUnconfirmedDeposits")]
    async fn process(&self, query: GetUnconfirmedDeposits) -> Result<Vec<Deposit>, sqlx::Error> {
        sqlx::query_as::<_, Deposit>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits \
             WHERE coin_symbol = $1 AND status = 'unconfirmed' \
             ORDER BY id"
        ))
        .bind(&query.coin_symbol)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Confirmed deposits whose address has been funded with gas and which have
/// not been swept yet.
pub struct GetCollectibleDeposits {
    pub coin_symbol: String,
}

impl Processor<GetCollectibleDeposits> for DatabaseProcessor {
    type Output = Vec<Deposit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetCollectibleDeposits")]
    async fn process(&self, query: GetCollectibleDeposits) -> Result<Vec<Deposit>, sqlx::Error> {
        sqlx::query_as::<_, Deposit>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits \
             WHERE coin_symbol = $1 AND status = 'confirmed' \
               AND detail ->> 'funding_tx_hash' IS NOT NULL \
               AND detail ->> 'collect_tx_hash' IS NULL \
             ORDER BY id"
        ))
        .bind(&query.coin_symbol)
        .fetch_all(&self.pool)
        .await
    }
}
