//! Persistent ledger access used by the processors.
//!
//! Every method that changes more than one row does so atomically; see
//! [`PgLedger`] for the PostgreSQL implementation.

mod postgres;

pub use postgres::PgLedger;

use async_trait::async_trait;
use ethers::types::Address;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::entities::{AddressMapping, Asset, Deposit, DepositInsert, Withdrawal};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// The record a nonce is allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonceClaim {
    Deposit(i64),
    Withdrawal(i64),
}

/// Identity and starting point of an asset row.
#[derive(Debug, Clone)]
pub struct AssetSeed {
    pub symbol: String,
    pub chain_id: i64,
    pub fee_symbol: String,
    pub genesis_height: i64,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read the asset row, creating it at its genesis cursor if absent.
    async fn load_asset(&self, seed: &AssetSeed) -> Result<Asset, LedgerError>;

    /// Client address mapping for a custodial address on this chain.
    async fn find_address(&self, address: &Address) -> Result<Option<AddressMapping>, LedgerError>;

    async fn deposit_exists(&self, coin_symbol: &str, tx_hash: &str) -> Result<bool, LedgerError>;

    /// Insert the deposits found in block `height` and advance the asset's
    /// cursor to it, in one transaction. Duplicates are skipped.
    ///
    /// Returns the ids of the deposits actually inserted.
    async fn commit_block(
        &self,
        coin_symbol: &str,
        height: u64,
        deposits: &[DepositInsert],
    ) -> Result<Vec<i64>, LedgerError>;

    /// Unconfirmed deposits of an asset, ordered by id.
    async fn unconfirmed_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError>;

    async fn get_deposit(&self, id: i64) -> Result<Option<Deposit>, LedgerError>;

    /// Flip an unconfirmed deposit to confirmed and credit its amount to the
    /// client's account, under a row lock.
    ///
    /// Returns `false` without touching anything when the deposit was no
    /// longer unconfirmed.
    async fn confirm_deposit(&self, id: i64) -> Result<bool, LedgerError>;

    async fn account_balance(&self, client_id: i64, coin_symbol: &str)
    -> Result<Decimal, LedgerError>;

    /// Confirmed, gas-funded, not yet swept deposits of an asset.
    async fn collectible_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError>;

    /// Withdrawals awaiting broadcast, ordered by nonce (unassigned last),
    /// then id.
    async fn pending_withdrawals(&self, coin_symbol: &str) -> Result<Vec<Withdrawal>, LedgerError>;

    /// Reserve the next nonce of `counter_key` for `claim` and store it on
    /// the record in the same transaction. A record that already holds a
    /// nonce keeps it. A counter seen for the first time starts at `seed`.
    async fn allocate_nonce(
        &self,
        counter_key: &str,
        claim: NonceClaim,
        seed: u64,
    ) -> Result<u64, LedgerError>;

    async fn finish_withdrawal(&self, id: i64, tx_hash: &str) -> Result<(), LedgerError>;

    async fn finish_collection(&self, id: i64, collect_tx_hash: &str) -> Result<(), LedgerError>;
}

pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::OutOfRange(format!("{what} {value}")))
}

pub(crate) fn to_u64(value: i64, what: &str) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::OutOfRange(format!("{what} {value}")))
}
