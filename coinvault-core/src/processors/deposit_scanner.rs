//! Deposit scanners.
//!
//! A scanner walks the chain from the asset's cursor towards
//! `height - confirmation_lag` in windows of at most `step` blocks, records
//! every incoming transfer to a custodial address as an unconfirmed
//! deposit, and persists the cursor together with the deposits of each
//! block.
//!
//! Two strategies exist:
//! - [`NativeScan`] reads full blocks and inspects every transaction.
//! - [`TokenScan`] fetches the token contract's `Transfer` logs for the
//!   window and commits every block of it, empty or not.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures_util::future::try_join_all;
use itertools::Itertools;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::amount::to_internal_decimal;
use crate::chain::{ChainError, ChainReader, TransferEvent, address_key, hash_key};
use crate::config::{AssetConfig, AssetKind};
use crate::entities::{AddressMapping, DepositDetail, DepositInsert};
use crate::events::{DepositEvent, DepositEventSender, publish};
use crate::ledger::{AssetSeed, Ledger, LedgerError};

/// Errors that abort a scan. Blocks committed before the error stay
/// committed.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("asset {0} is not a token")]
    NotAToken(String),
}

/// Inclusive block range processed in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: u64,
    pub to: u64,
}

/// Next window after `cursor`, or `None` when there is nothing safe to scan.
pub fn scan_window(cursor: u64, height: u64, step: u64, lag: u64) -> Option<ScanWindow> {
    let safe = height.checked_sub(lag)?;
    let to = safe.min(cursor.saturating_add(step));
    (to > cursor).then_some(ScanWindow {
        from: cursor + 1,
        to,
    })
}

/// What one scanner invocation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub blocks: u64,
    pub deposits: usize,
    pub cursor: u64,
}

/// Shared state handed to a [`ScanStrategy`].
pub struct ScanContext {
    pub asset: Arc<AssetConfig>,
    pub chain_id: i64,
    pub ledger: Arc<dyn Ledger>,
    pub chain: Arc<dyn ChainReader>,
    events: DepositEventSender,
}

impl ScanContext {
    pub fn new(
        asset: Arc<AssetConfig>,
        chain_id: i64,
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn ChainReader>,
        events: DepositEventSender,
    ) -> Self {
        Self {
            asset,
            chain_id,
            ledger,
            chain,
            events,
        }
    }

    fn symbol(&self) -> &str {
        &self.asset.symbol
    }

    /// Custodial mapping of `recipient`, if it is one of ours.
    async fn mapping(&self, recipient: &Address) -> Result<Option<AddressMapping>, ScanError> {
        Ok(self.ledger.find_address(recipient).await?)
    }

    async fn is_recorded(&self, tx_hash: &str) -> Result<bool, ScanError> {
        Ok(self.ledger.deposit_exists(self.symbol(), tx_hash).await?)
    }

    fn below_threshold(&self, value: U256) -> bool {
        value < self.asset.deposit.min_threshold
    }

    /// Build the deposit row, or `None` when `value` has no ledger
    /// representation. Such transfers are rejected for good, not retried.
    fn deposit(
        &self,
        mapping: AddressMapping,
        tx_hash: &str,
        value: U256,
        detail: DepositDetail,
    ) -> Option<DepositInsert> {
        let amount = match to_internal_decimal(value, self.asset.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(
                    asset = %self.symbol(),
                    tx_hash = %tx_hash,
                    value = %value,
                    error = %e,
                    "Rejecting deposit with unrepresentable amount"
                );
                return None;
            }
        };
        Some(DepositInsert {
            client_id: mapping.client_id,
            addr_path: mapping.path,
            coin_symbol: self.asset.symbol.to_string(),
            tx_hash: tx_hash.to_owned(),
            amount,
            fee_amount: Decimal::ZERO,
            fee_symbol: self.asset.fee_symbol.to_string(),
            detail,
        })
    }

    /// Persist a block's deposits with the cursor advance, then announce
    /// the new deposits.
    pub async fn commit(&self, height: u64, deposits: &[DepositInsert]) -> Result<usize, ScanError> {
        let ids = self.ledger.commit_block(self.symbol(), height, deposits).await?;
        for deposit_id in &ids {
            publish(
                &self.events,
                DepositEvent::Created {
                    deposit_id: *deposit_id,
                    coin_symbol: self.asset.symbol.to_string(),
                },
            )
            .await;
        }
        if !ids.is_empty() {
            info!(asset = %self.symbol(), height, deposits = ids.len(), "Recorded deposits");
        }
        Ok(ids.len())
    }
}

#[async_trait]
pub trait ScanStrategy: Send + Sync {
    /// Process every block of `window` in ascending order, committing each
    /// through [`ScanContext::commit`]. Returns the number of new deposits.
    async fn scan(&self, ctx: &ScanContext, window: ScanWindow) -> Result<usize, ScanError>;
}

/// Block-by-block scan of native value transfers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeScan;

impl NativeScan {
    async fn scan_block(&self, ctx: &ScanContext, height: u64) -> Result<usize, ScanError> {
        let block = ctx.chain.block_with_transactions(height).await?;
        let pocket = ctx.asset.deposit.pocket_address;

        let mut candidates = Vec::new();
        for tx in block.transactions {
            let Some(to) = tx.to else {
                continue;
            };
            if Some(tx.from) == pocket || ctx.below_threshold(tx.value) {
                continue;
            }
            let Some(mapping) = ctx.mapping(&to).await? else {
                continue;
            };
            candidates.push((tx, to, mapping));
        }

        let receipts = try_join_all(
            candidates
                .iter()
                .map(|(tx, _, _)| ctx.chain.receipt_succeeded(tx.hash)),
        )
        .await?;

        let mut deposits = Vec::new();
        for ((tx, to, mapping), succeeded) in candidates.into_iter().zip(receipts) {
            let tx_hash = hash_key(&tx.hash);
            if !succeeded {
                debug!(asset = %ctx.symbol(), tx_hash = %tx_hash, "Skipping failed transaction");
                continue;
            }
            if ctx.is_recorded(&tx_hash).await? {
                continue;
            }
            let detail = DepositDetail {
                block_hash: hash_key(&block.hash),
                block_height: height as i64,
                sender: address_key(&tx.from),
                recipient: address_key(&to),
                ..Default::default()
            };
            deposits.extend(ctx.deposit(mapping, &tx_hash, tx.value, detail));
        }

        ctx.commit(height, &deposits).await
    }
}

#[async_trait]
impl ScanStrategy for NativeScan {
    async fn scan(&self, ctx: &ScanContext, window: ScanWindow) -> Result<usize, ScanError> {
        let mut found = 0;
        for height in window.from..=window.to {
            found += self.scan_block(ctx, height).await?;
        }
        Ok(found)
    }
}

/// `Transfer`-event scan of one token contract.
#[derive(Debug, Clone)]
pub struct TokenScan {
    contract: Address,
    event: TransferEvent,
}

impl TokenScan {
    pub fn new(contract: Address, event: TransferEvent) -> Self {
        Self { contract, event }
    }

    pub fn for_asset(asset: &AssetConfig) -> Result<Self, ScanError> {
        match &asset.kind {
            AssetKind::Token { contract, event } => Ok(Self::new(*contract, event.clone())),
            AssetKind::Native => Err(ScanError::NotAToken(asset.symbol.to_string())),
        }
    }
}

#[async_trait]
impl ScanStrategy for TokenScan {
    async fn scan(&self, ctx: &ScanContext, window: ScanWindow) -> Result<usize, ScanError> {
        let logs = ctx
            .chain
            .transfer_logs(self.contract, &self.event, window.from, window.to)
            .await?;

        let mut by_block: BTreeMap<u64, Vec<DepositInsert>> = BTreeMap::new();
        let ordered = logs
            .into_iter()
            .sorted_by_key(|log| (log.block_number, log.log_index));
        for log in ordered {
            let Some(transfer) = self.event.extract(&log) else {
                warn!(
                    asset = %ctx.symbol(),
                    tx_hash = %hash_key(&log.tx_hash),
                    "Transfer log is missing configured fields"
                );
                continue;
            };
            if ctx.below_threshold(transfer.value) {
                continue;
            }
            let Some(mapping) = ctx.mapping(&transfer.to).await? else {
                continue;
            };
            let tx_hash = hash_key(&log.tx_hash);
            let pending = by_block.entry(log.block_number).or_default();
            if pending.iter().any(|d| d.tx_hash == tx_hash) || ctx.is_recorded(&tx_hash).await? {
                continue;
            }
            let detail = DepositDetail {
                block_hash: hash_key(&log.block_hash),
                block_height: log.block_number as i64,
                sender: address_key(&transfer.from),
                recipient: address_key(&transfer.to),
                ..Default::default()
            };
            pending.extend(ctx.deposit(mapping, &tx_hash, transfer.value, detail));
        }

        let mut found = 0;
        for height in window.from..=window.to {
            let deposits = by_block.remove(&height).unwrap_or_default();
            found += ctx.commit(height, &deposits).await?;
        }
        Ok(found)
    }
}

/// Scanner of one asset, driven by the scheduler.
pub struct DepositScanner<S: ScanStrategy> {
    strategy: S,
    ctx: ScanContext,
}

impl<S: ScanStrategy> DepositScanner<S> {
    pub fn new(strategy: S, ctx: ScanContext) -> Self {
        Self { strategy, ctx }
    }

    pub fn symbol(&self) -> &str {
        self.ctx.symbol()
    }

    /// Catch the cursor up with `height - confirmation_lag`, one window at a
    /// time. The chain height is read once per invocation.
    pub async fn scan(&self) -> Result<ScanReport, ScanError> {
        let asset = &self.ctx.asset;
        let seed = AssetSeed {
            symbol: asset.symbol.to_string(),
            chain_id: self.ctx.chain_id,
            fee_symbol: asset.fee_symbol.to_string(),
            genesis_height: i64::try_from(asset.genesis_height)
                .map_err(|_| LedgerError::OutOfRange(format!("genesis {}", asset.genesis_height)))?,
        };
        let start = self.ctx.ledger.load_asset(&seed).await?.cursor.max(0) as u64;
        let height = self.ctx.chain.block_number().await?;

        let mut report = ScanReport {
            cursor: start,
            ..Default::default()
        };
        while let Some(window) = scan_window(
            report.cursor,
            height,
            asset.deposit.step,
            asset.deposit.confirmation_lag,
        ) {
            debug!(asset = %asset.symbol, from = window.from, to = window.to, "Scanning window");
            report.deposits += self.strategy.scan(&self.ctx, window).await?;
            report.blocks += window.to - window.from + 1;
            report.cursor = window.to;
        }

        if report.blocks > 0 {
            debug!(
                asset = %asset.symbol,
                cursor = report.cursor,
                blocks = report.blocks,
                deposits = report.deposits,
                "Scan caught up"
            );
        }
        Ok(report)
    }
}
