use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use sqlx::{Postgres, Transaction};

/// Scan state of one asset. `cursor` is the last block whose deposits are
/// fully persisted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Asset {
    pub symbol: String,
    pub chain_id: i64,
    pub fee_symbol: String,
    pub cursor: i64,
    pub updated_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone)]
/// Create the asset row with its genesis cursor if it does not exist yet,
/// then return it.
pub struct EnsureAsset {
    pub symbol: String,
    pub chain_id: i64,
    pub fee_symbol: String,
    pub genesis_height: i64,
}

impl Processor<EnsureAsset> for DatabaseProcessor {
    type Output = Asset;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:EnsureAsset")]
    async fn process(&self, query: EnsureAsset) -> Result<Asset, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO assets (symbol, chain_id, fee_symbol, cursor)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(&query.symbol)
        .bind(query.chain_id)
        .bind(&query.fee_symbol)
        .bind(query.genesis_height)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, Asset>(
            r#"
            SELECT symbol, chain_id, fee_symbol, cursor, updated_at
            FROM assets
            WHERE symbol = $1
            "#,
        )
        .bind(&query.symbol)
        .fetch_one(&self.pool)
        .await
    }
}

impl Asset {
    /// Move the cursor forward to `height`. A lower `height` leaves the
    /// cursor where it is.
    pub async fn advance_cursor_tx(
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
        height: i64,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE assets
            SET cursor = GREATEST(cursor, $2), updated_at = now()
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .bind(height)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }
}
