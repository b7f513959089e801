//! Per-asset configuration.

use std::time::Duration;

use compact_str::CompactString;
use ethers::types::{Address, U256};

use crate::chain::TransferEvent;

/// An asset tracked on the chain: the native coin or one ERC-20 token.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub symbol: CompactString,
    /// Asset paying the gas for this asset's transfers.
    pub fee_symbol: CompactString,
    /// Native precision: one on-chain unit is `10^-decimals`.
    pub decimals: u32,
    /// Cursor value used when the asset has never been scanned.
    pub genesis_height: u64,
    pub kind: AssetKind,
    pub deposit: DepositConfig,
    pub confirmation: ConfirmationConfig,
    /// Present when deposits of this asset are swept to the collection address.
    pub collect: Option<CollectConfig>,
    /// Present when withdrawals of this asset are processed.
    pub withdrawal: Option<WithdrawalConfig>,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone)]
pub enum AssetKind {
    Native,
    Token {
        contract: Address,
        event: TransferEvent,
    },
}

impl AssetKind {
    pub fn contract(&self) -> Option<Address> {
        match self {
            AssetKind::Native => None,
            AssetKind::Token { contract, .. } => Some(*contract),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositConfig {
    /// Maximum number of blocks committed per scan window.
    pub step: u64,
    /// Blocks behind the head the scanner stays.
    pub confirmation_lag: u64,
    /// Transfers below this many native units are ignored.
    pub min_threshold: U256,
    /// Internal address that funds deposit addresses with gas; its
    /// transfers are not deposits.
    pub pocket_address: Option<Address>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationConfig {
    /// Depth at which a deposit is credited.
    pub threshold: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectConfig {
    /// Added to `eth_gasPrice` for sweep transactions.
    pub gas_premium: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct WithdrawalConfig {
    /// Gas price used when the withdrawal record carries none.
    pub gas_price: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub deposit_scan: Duration,
    pub confirmation: Duration,
    pub collection: Duration,
    pub withdrawal: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            deposit_scan: Duration::from_secs(15),
            confirmation: Duration::from_secs(30),
            collection: Duration::from_secs(60),
            withdrawal: Duration::from_secs(30),
        }
    }
}
