use sqlx::{Postgres, Transaction};

/// Next-nonce counter of one signing address. `value` is the nonce the next
/// allocation hands out.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NonceCounter {
    pub address: String,
    pub value: i64,
}

impl NonceCounter {
    /// Reserve one nonce for `address`. A missing counter starts at `seed`.
    ///
    /// Returns the reserved nonce; the counter row stays locked until the
    /// transaction ends.
    pub async fn increment_tx(
        tx: &mut Transaction<'_, Postgres>,
        address: &str,
        seed: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO nonce_counters (address, value)
            VALUES ($1, $2)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address)
        .bind(seed)
        .execute(&mut **tx)
        .await?;

        let current = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM nonce_counters WHERE address = $1 FOR UPDATE",
        )
        .bind(address)
        .fetch_one(&mut **tx)
        .await?;

        let after = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE nonce_counters
            SET value = $2, updated_at = now()
            WHERE address = $1
            RETURNING value
            "#,
        )
        .bind(address)
        .bind(current + 1)
        .fetch_one(&mut **tx)
        .await?;
        Ok(after - 1)
    }
}

