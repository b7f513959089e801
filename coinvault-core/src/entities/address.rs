use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// A custodial deposit address issued to a client. Owned by the address
/// issuance service; read only here.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AddressMapping {
    pub client_id: i64,
    pub path: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct FindAddressMapping {
    /// Lowercase `0x` address.
    pub address: String,
    pub chain_id: i64,
}

impl Processor<FindAddressMapping> for DatabaseProcessor {
    type Output = Option<AddressMapping>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindAddressMapping")]
    async fn process(
        &self,
        query: FindAddressMapping,
    ) -> Result<Option<AddressMapping>, sqlx::Error> {
        sqlx::query_as::<_, AddressMapping>(
            r#"
            SELECT client_id, path, address
            FROM addresses
            WHERE lower(address) = $1 AND chain_id = $2
            "#,
        )
        .bind(query.address.to_lowercase())
        .bind(query.chain_id)
        .fetch_optional(&self.pool)
        .await
    }
}
