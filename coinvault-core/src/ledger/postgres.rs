use async_trait::async_trait;
use ethers::types::Address;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use tracing::debug;

use super::{AssetSeed, Ledger, LedgerError, NonceClaim, to_i64, to_u64};
use crate::chain::address_key;
use crate::entities::account::GetAccount;
use crate::entities::address::FindAddressMapping;
use crate::entities::asset::EnsureAsset;
use crate::entities::deposit::{
    DepositExists, GetCollectibleDeposits, GetDeposit, GetUnconfirmedDeposits,
};
use crate::entities::withdrawal::GetPendingWithdrawals;
use crate::entities::{
    Account, AddressMapping, Asset, Deposit, DepositInsert, DepositStatus, NonceCounter,
    Withdrawal,
};
use crate::framework::DatabaseProcessor;

/// [`Ledger`] over PostgreSQL.
///
/// Reads go through the entity query processors; each multi-row write runs
/// in its own transaction and locks the rows it mutates with
/// `SELECT ... FOR UPDATE`.
#[derive(Debug, Clone)]
pub struct PgLedger {
    db: DatabaseProcessor,
    chain_id: i64,
}

impl PgLedger {
    pub fn new(db: DatabaseProcessor, chain_id: i64) -> Self {
        Self { db, chain_id }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn load_asset(&self, seed: &AssetSeed) -> Result<Asset, LedgerError> {
        let asset = self
            .db
            .process(EnsureAsset {
                symbol: seed.symbol.clone(),
                chain_id: seed.chain_id,
                fee_symbol: seed.fee_symbol.clone(),
                genesis_height: seed.genesis_height,
            })
            .await?;
        Ok(asset)
    }

    async fn find_address(&self, address: &Address) -> Result<Option<AddressMapping>, LedgerError> {
        let mapping = self
            .db
            .process(FindAddressMapping {
                address: address_key(address),
                chain_id: self.chain_id,
            })
            .await?;
        Ok(mapping)
    }

    async fn deposit_exists(&self, coin_symbol: &str, tx_hash: &str) -> Result<bool, LedgerError> {
        let exists = self
            .db
            .process(DepositExists {
                coin_symbol: coin_symbol.to_owned(),
                tx_hash: tx_hash.to_owned(),
            })
            .await?;
        Ok(exists)
    }

    async fn commit_block(
        &self,
        coin_symbol: &str,
        height: u64,
        deposits: &[DepositInsert],
    ) -> Result<Vec<i64>, LedgerError> {
        let height = to_i64(height, "block height")?;
        let mut tx = self.db.begin().await?;
        let mut inserted = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            if let Some(id) = Deposit::insert_tx(&mut tx.tx, deposit).await? {
                inserted.push(id);
            } else {
                debug!(asset = %coin_symbol, tx_hash = %deposit.tx_hash, "Deposit already recorded");
            }
        }
        Asset::advance_cursor_tx(&mut tx.tx, coin_symbol, height).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn unconfirmed_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError> {
        let deposits = self
            .db
            .process(GetUnconfirmedDeposits {
                coin_symbol: coin_symbol.to_owned(),
            })
            .await?;
        Ok(deposits)
    }

    async fn get_deposit(&self, id: i64) -> Result<Option<Deposit>, LedgerError> {
        let deposit = self.db.process(GetDeposit { id }).await?;
        Ok(deposit)
    }

    async fn confirm_deposit(&self, id: i64) -> Result<bool, LedgerError> {
        let mut tx = self.db.begin().await?;
        let deposit = Deposit::lock_tx(&mut tx.tx, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("deposit {id}")))?;
        if deposit.status != DepositStatus::Unconfirmed {
            return Ok(false);
        }
        Deposit::set_status_tx(&mut tx.tx, id, DepositStatus::Confirmed).await?;
        Account::credit_tx(&mut tx.tx, deposit.client_id, &deposit.coin_symbol, deposit.amount)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn account_balance(
        &self,
        client_id: i64,
        coin_symbol: &str,
    ) -> Result<Decimal, LedgerError> {
        let account = self
            .db
            .process(GetAccount {
                client_id,
                coin_symbol: coin_symbol.to_owned(),
            })
            .await?;
        Ok(account.map(|a| a.balance).unwrap_or_default())
    }

    async fn collectible_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError> {
        let deposits = self
            .db
            .process(GetCollectibleDeposits {
                coin_symbol: coin_symbol.to_owned(),
            })
            .await?;
        Ok(deposits)
    }

    async fn pending_withdrawals(&self, coin_symbol: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let withdrawals = self
            .db
            .process(GetPendingWithdrawals {
                coin_symbol: coin_symbol.to_owned(),
            })
            .await?;
        Ok(withdrawals)
    }

    async fn allocate_nonce(
        &self,
        counter_key: &str,
        claim: NonceClaim,
        seed: u64,
    ) -> Result<u64, LedgerError> {
        let seed = to_i64(seed, "nonce seed")?;
        let mut tx = self.db.begin().await?;

        let existing = match claim {
            NonceClaim::Deposit(id) => Deposit::lock_tx(&mut tx.tx, id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("deposit {id}")))?
                .detail
                .nonce,
            NonceClaim::Withdrawal(id) => Withdrawal::lock_tx(&mut tx.tx, id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {id}")))?
                .nonce,
        };
        if let Some(nonce) = existing {
            return to_u64(nonce, "nonce");
        }

        let nonce = NonceCounter::increment_tx(&mut tx.tx, counter_key, seed).await?;
        match claim {
            NonceClaim::Deposit(id) => Deposit::set_nonce_tx(&mut tx.tx, id, nonce).await?,
            NonceClaim::Withdrawal(id) => Withdrawal::set_nonce_tx(&mut tx.tx, id, nonce).await?,
        }
        tx.commit().await?;
        to_u64(nonce, "nonce")
    }

    async fn finish_withdrawal(&self, id: i64, tx_hash: &str) -> Result<(), LedgerError> {
        let mut tx = self.db.begin().await?;
        Withdrawal::finish_tx(&mut tx.tx, id, tx_hash).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finish_collection(&self, id: i64, collect_tx_hash: &str) -> Result<(), LedgerError> {
        let mut tx = self.db.begin().await?;
        Deposit::finish_collection_tx(&mut tx.tx, id, collect_tx_hash).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// These run against the database named by `DATABASE_URL` and are skipped
/// when it is unset. Every test works on its own asset symbol, so reruns
/// against the same database do not collide.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DepositDetail, WithdrawalStatus};
    use futures_util::future::join_all;
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use std::str::FromStr;

    const CHAIN_ID: i64 = 1;

    async fn ledger() -> Option<(PgLedger, PgPool)> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL ledger test");
            return None;
        };
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("../migrations").run(&pool).await.unwrap();
        let ledger = PgLedger::new(DatabaseProcessor::new(pool.clone()), CHAIN_ID);
        Some((ledger, pool))
    }

    fn unique(prefix: &str) -> String {
        format!(
            "{prefix}-{}",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        )
    }

    async fn asset(ledger: &PgLedger, symbol: &str, cursor: i64) {
        ledger
            .load_asset(&AssetSeed {
                symbol: symbol.to_string(),
                chain_id: CHAIN_ID,
                fee_symbol: "ETH".to_string(),
                genesis_height: cursor,
            })
            .await
            .unwrap();
    }

    fn insert(symbol: &str, tx_hash: &str, amount: &str) -> DepositInsert {
        DepositInsert {
            client_id: 7,
            addr_path: "3".to_string(),
            coin_symbol: symbol.to_string(),
            tx_hash: tx_hash.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            fee_amount: Decimal::ZERO,
            fee_symbol: "ETH".to_string(),
            detail: DepositDetail {
                block_hash: "0x0a".to_string(),
                block_height: 10,
                sender: "0x09".to_string(),
                recipient: "0x01".to_string(),
                funding_tx_hash: Some("0xf0".to_string()),
                ..Default::default()
            },
        }
    }

    async fn cursor(ledger: &PgLedger, symbol: &str) -> i64 {
        ledger
            .load_asset(&AssetSeed {
                symbol: symbol.to_string(),
                chain_id: CHAIN_ID,
                fee_symbol: "ETH".to_string(),
                genesis_height: 0,
            })
            .await
            .unwrap()
            .cursor
    }

    #[tokio::test]
    async fn replayed_block_inserts_nothing() {
        let Some((ledger, _pool)) = ledger().await else {
            return;
        };
        let symbol = unique("REPLAY");
        asset(&ledger, &symbol, 5).await;
        let block = [insert(&symbol, "0xa1", "1.5"), insert(&symbol, "0xa2", "2")];

        let first = ledger.commit_block(&symbol, 10, &block).await.unwrap();
        let second = ledger.commit_block(&symbol, 10, &block).await.unwrap();
        ledger.commit_block(&symbol, 8, &[]).await.unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert!(ledger.deposit_exists(&symbol, "0xa1").await.unwrap());
        assert_eq!(ledger.unconfirmed_deposits(&symbol).await.unwrap().len(), 2);
        assert_eq!(cursor(&ledger, &symbol).await, 10);
    }

    #[tokio::test]
    async fn commit_block_for_unknown_asset_rolls_back() {
        let Some((ledger, _pool)) = ledger().await else {
            return;
        };
        let symbol = unique("MISSING");

        let result = ledger
            .commit_block(&symbol, 10, &[insert(&symbol, "0xb1", "1")])
            .await;

        assert!(result.is_err());
        assert!(!ledger.deposit_exists(&symbol, "0xb1").await.unwrap());
    }

    #[tokio::test]
    async fn racing_confirmations_credit_once() {
        let Some((ledger, _pool)) = ledger().await else {
            return;
        };
        let symbol = unique("CONFIRM");
        asset(&ledger, &symbol, 0).await;
        let ids = ledger
            .commit_block(&symbol, 10, &[insert(&symbol, "0xc1", "4.25")])
            .await
            .unwrap();
        let id = ids[0];

        let results = join_all((0..4).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.confirm_deposit(id).await })
        }))
        .await;
        let credited = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|credited| *credited)
            .count();

        assert_eq!(credited, 1);
        let deposit = ledger.get_deposit(id).await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Confirmed);
        assert_eq!(
            ledger.account_balance(7, &symbol).await.unwrap(),
            Decimal::from_str("4.25").unwrap()
        );
        assert!(!ledger.confirm_deposit(id).await.unwrap());
    }

    async fn withdrawal(pool: &PgPool, symbol: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO withdrawals (client_id, coin_symbol, recipient, amount)
            VALUES (1, $1, '0x0000000000000000000000000000000000000002', 1)
            RETURNING id
            "#,
        )
        .bind(symbol)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn racing_allocations_are_contiguous() {
        let Some((ledger, pool)) = ledger().await else {
            return;
        };
        let symbol = unique("NONCE");
        let counter = unique("0xsigner");
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(withdrawal(&pool, &symbol).await);
        }

        let results = join_all(ids.iter().map(|id| {
            let ledger = ledger.clone();
            let counter = counter.clone();
            let id = *id;
            tokio::spawn(async move {
                ledger
                    .allocate_nonce(&counter, NonceClaim::Withdrawal(id), 7)
                    .await
            })
        }))
        .await;
        let mut nonces: Vec<u64> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        nonces.sort_unstable();
        assert_eq!(nonces, (7..19).collect::<Vec<u64>>());

        let again = ledger
            .allocate_nonce(&counter, NonceClaim::Withdrawal(ids[0]), 100)
            .await
            .unwrap();
        let pending = ledger.pending_withdrawals(&symbol).await.unwrap();
        let stored = pending.iter().find(|w| w.id == ids[0]).unwrap();
        assert_eq!(stored.nonce, Some(again as i64));
        assert!(
            pending
                .windows(2)
                .all(|pair| pair[0].nonce <= pair[1].nonce)
        );

        ledger.finish_withdrawal(ids[0], "0xd1").await.unwrap();
        let pending = ledger.pending_withdrawals(&symbol).await.unwrap();
        assert_eq!(pending.len(), 11);
        let finished = sqlx::query_as::<_, (WithdrawalStatus, Option<String>)>(
            "SELECT status, tx_hash FROM withdrawals WHERE id = $1",
        )
        .bind(ids[0])
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(finished, (WithdrawalStatus::Finished, Some("0xd1".to_string())));
    }

    #[tokio::test]
    async fn deposit_nonce_and_sweep_land_in_detail() {
        let Some((ledger, _pool)) = ledger().await else {
            return;
        };
        let symbol = unique("SWEEP");
        asset(&ledger, &symbol, 0).await;
        let id = ledger
            .commit_block(&symbol, 10, &[insert(&symbol, "0xe1", "3")])
            .await
            .unwrap()[0];
        ledger.confirm_deposit(id).await.unwrap();
        let counter = unique("0xdeposit");

        let nonce = ledger
            .allocate_nonce(&counter, NonceClaim::Deposit(id), 0)
            .await
            .unwrap();
        let recalled = ledger
            .allocate_nonce(&counter, NonceClaim::Deposit(id), 0)
            .await
            .unwrap();
        assert_eq!((nonce, recalled), (0, 0));

        let collectible = ledger.collectible_deposits(&symbol).await.unwrap();
        assert_eq!(collectible.len(), 1);
        assert_eq!(collectible[0].detail.nonce, Some(0));

        ledger.finish_collection(id, "0xe2").await.unwrap();
        let deposit = ledger.get_deposit(id).await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Finished);
        assert_eq!(deposit.detail.collect_tx_hash.as_deref(), Some("0xe2"));
        assert_eq!(deposit.detail.nonce, Some(0));
        assert_eq!(deposit.detail.funding_tx_hash.as_deref(), Some("0xf0"));
        assert!(ledger.collectible_deposits(&symbol).await.unwrap().is_empty());
    }
}
