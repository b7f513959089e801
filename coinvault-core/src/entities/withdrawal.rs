use crate::entities::WithdrawalStatus;
use crate::framework::DatabaseProcessor;
use ethers::types::U256;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

/// A client withdrawal. Rows are created by the account service; this crate
/// only assigns the nonce and records the broadcast.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub client_id: i64,
    pub coin_symbol: String,
    pub recipient: String,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub nonce: Option<i64>,
    pub memo: Option<String>,
    pub detail: Json<WithdrawalDetail>,
    pub created_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WithdrawalDetail {
    /// Fixed gas price for this withdrawal, in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
}

const WITHDRAWAL_COLUMNS: &str = "id, client_id, coin_symbol, recipient, amount, status, \
    tx_hash, nonce, memo, detail, created_at";

impl Withdrawal {
    pub async fn lock_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Option<Withdrawal>, sqlx::Error> {
        sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn set_nonce_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        nonce: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE withdrawals SET nonce = $2 WHERE id = $1")
            .bind(id)
            .bind(nonce)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn finish_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        tx_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE withdrawals SET tx_hash = $2, status = 'finished' WHERE id = $1")
            .bind(id)
            .bind(tx_hash)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Withdrawals waiting for broadcast, in nonce order; records without a
/// nonce come last, oldest first.
pub struct GetPendingWithdrawals {
    pub coin_symbol: String,
}

impl Processor<GetPendingWithdrawals> for DatabaseProcessor {
    type Output = Vec<Withdrawal>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPendingWithdrawals")]
    async fn process(&self, query: GetPendingWithdrawals) -> Result<Vec<Withdrawal>, sqlx::Error> {
        sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
             WHERE coin_symbol = $1 AND status = 'created' AND tx_hash IS NULL \
             ORDER BY nonce ASC NULLS LAST, id ASC"
        ))
        .bind(&query.coin_symbol)
        .fetch_all(&self.pool)
        .await
    }
}
