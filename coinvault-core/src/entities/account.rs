use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub client_id: i64,
    pub coin_symbol: String,
    pub balance: Decimal,
}

impl Account {
    /// Add `amount` to the client's balance, creating the account at zero
    /// first if needed. The row stays locked until the transaction ends.
    ///
    /// Returns the new balance.
    pub async fn credit_tx(
        tx: &mut Transaction<'_, Postgres>,
        client_id: i64,
        coin_symbol: &str,
        amount: Decimal,
    ) -> Result<Decimal, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO accounts (client_id, coin_symbol, balance)
            VALUES ($1, $2, 0)
            ON CONFLICT (client_id, coin_symbol) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(coin_symbol)
        .execute(&mut **tx)
        .await?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT client_id, coin_symbol, balance
            FROM accounts
            WHERE client_id = $1 AND coin_symbol = $2
            FOR UPDATE
            "#,
        )
        .bind(client_id)
        .bind(coin_symbol)
        .fetch_one(&mut **tx)
        .await?;

        let balance = account.balance + amount;
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, updated_at = now()
            WHERE client_id = $1 AND coin_symbol = $2
            "#,
        )
        .bind(client_id)
        .bind(coin_symbol)
        .bind(balance)
        .execute(&mut **tx)
        .await?;
        Ok(balance)
    }
}

#[derive(Debug, Clone)]
pub struct GetAccount {
    pub client_id: i64,
    pub coin_symbol: String,
}

impl Processor<GetAccount> for DatabaseProcessor {
    type Output = Option<Account>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetAccount")]
    async fn process(&self, query: GetAccount) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "SELECT client_id, coin_symbol, balance FROM accounts WHERE client_id = $1 AND coin_symbol = $2",
        )
        .bind(query.client_id)
        .bind(&query.coin_symbol)
        .fetch_optional(&self.pool)
        .await
    }
}
