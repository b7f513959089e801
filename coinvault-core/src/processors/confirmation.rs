//! Confirmation engine.
//!
//! Promotes unconfirmed deposits that are `threshold` blocks deep and
//! credits the client's account. The status flip and the credit happen in
//! one ledger transaction under the deposit's row lock, so a deposit is
//! credited exactly once even when two runs overlap.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::chain::{ChainError, ChainReader};
use crate::config::AssetConfig;
use crate::entities::DepositStatus;
use crate::events::{DepositEvent, DepositEventSender, publish};
use crate::ledger::{Ledger, LedgerError};

#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmationReport {
    pub confirmed: usize,
    pub waiting: usize,
    pub failed: usize,
}

pub struct ConfirmationEngine {
    asset: Arc<AssetConfig>,
    ledger: Arc<dyn Ledger>,
    chain: Arc<dyn ChainReader>,
    events: DepositEventSender,
}

impl ConfirmationEngine {
    pub fn new(
        asset: Arc<AssetConfig>,
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn ChainReader>,
        events: DepositEventSender,
    ) -> Self {
        Self {
            asset,
            ledger,
            chain,
            events,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.asset.symbol
    }

    pub async fn run(&self) -> Result<ConfirmationReport, ConfirmationError> {
        let height = self.chain.block_number().await?;
        let threshold = self.asset.confirmation.threshold;
        let deposits = self.ledger.unconfirmed_deposits(self.symbol()).await?;

        let mut report = ConfirmationReport::default();
        for deposit in deposits {
            let block_height = u64::try_from(deposit.detail.block_height).unwrap_or(u64::MAX);
            let depth = height.saturating_sub(block_height);
            if depth < threshold {
                report.waiting += 1;
                continue;
            }

            match self.ledger.confirm_deposit(deposit.id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(
                        asset = %self.symbol(),
                        deposit_id = deposit.id,
                        error = %e,
                        "Failed to confirm deposit"
                    );
                    report.failed += 1;
                    continue;
                }
            }
            report.confirmed += 1;
            info!(
                asset = %self.symbol(),
                deposit_id = deposit.id,
                client_id = deposit.client_id,
                amount = %deposit.amount,
                depth,
                "Deposit confirmed"
            );

            let refreshed = match self.ledger.get_deposit(deposit.id).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!(
                        asset = %self.symbol(),
                        deposit_id = deposit.id,
                        error = %e,
                        "Deposit credited but not re-read, skipping event"
                    );
                    continue;
                }
            };
            if refreshed.is_some_and(|d| d.status == DepositStatus::Confirmed) {
                publish(
                    &self.events,
                    DepositEvent::Confirmed {
                        deposit_id: deposit.id,
                        coin_symbol: deposit.coin_symbol.clone(),
                    },
                )
                .await;
            }
        }
        Ok(report)
    }
}
