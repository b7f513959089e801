//! Outbound transaction broadcaster.
//!
//! Withdrawals and collection sweeps share one pipeline, [`Broadcaster::dispatch`]:
//! allocate or recall the record's nonce, check it against the chain's
//! pending count, check balances, build and sign a legacy transaction and
//! send it. A record whose dispatch fails keeps its nonce, so the retry on
//! the next tick reuses it.
//!
//! The flows differ in how candidates are picked and how gas is priced:
//! withdrawals pay a fixed price, sweeps pay `eth_gasPrice` plus a premium.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use coinvault_sdk::client::{ClientError, PartnerClient};
use coinvault_sdk::objects::PartnerWithdrawalNotice;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, TransactionRequest, U256};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::amount::{AmountError, decimal_to_native};
use crate::chain::erc20::transfer_call_data;
use crate::chain::{ChainError, ChainReader, OutboundCall, address_key, hash_key};
use crate::config::{AssetConfig, PartnerConfig};
use crate::entities::{Deposit, Withdrawal};
use crate::ledger::{Ledger, LedgerError, NonceClaim};
use crate::processors::nonce::NonceAllocator;
use crate::signer::{Signer, SignerError, deposit_path};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    /// The chain already used this nonce. Someone else signed for the
    /// address, or a broadcast was lost after acceptance.
    #[error("nonce {local} of {address} is behind the chain ({chain})")]
    NonceBehind { address: String, local: u64, chain: u64 },

    /// Earlier nonces of the address are still outstanding.
    #[error("nonce {local} of {address} is ahead of the chain ({chain})")]
    NoncePending { address: String, local: u64, chain: u64 },

    #[error("insufficient token balance: {available} < {required}")]
    InsufficientTokenBalance { available: U256, required: U256 },

    #[error("insufficient fee balance: {available} < {required}")]
    InsufficientFeeBalance { available: U256, required: U256 },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("key at {path} controls {actual}, expected {expected}")]
    KeyMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("fee overflows")]
    FeeOverflow,
}

impl BroadcastError {
    /// Whether later records signed by the same address must wait.
    pub fn halts_address(&self) -> bool {
        matches!(self, BroadcastError::NonceBehind { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    Fixed(U256),
    MarketPlusPremium(U256),
}

/// One outbound transfer of the broadcaster's asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub claim: NonceClaim,
    /// Nonce already stored on the record.
    pub recorded_nonce: Option<i64>,
    pub signer_path: String,
    /// Address the key at `signer_path` must control, when known.
    pub expected_from: Option<Address>,
    pub recipient: Address,
    pub amount: Decimal,
    pub gas_limit: Option<U256>,
    pub pricing: GasPricing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub from: Address,
    pub nonce: u64,
    pub tx_hash: H256,
}

/// Builds, signs and sends transfers of one asset.
pub struct Broadcaster {
    asset: Arc<AssetConfig>,
    chain_id: u64,
    ledger: Arc<dyn Ledger>,
    chain: Arc<dyn ChainReader>,
    signer: Arc<dyn Signer>,
    nonces: NonceAllocator,
}

impl Broadcaster {
    pub fn new(
        asset: Arc<AssetConfig>,
        chain_id: u64,
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn ChainReader>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let nonces = NonceAllocator::new(ledger.clone());
        Self {
            asset,
            chain_id,
            ledger,
            chain,
            signer,
            nonces,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.asset.symbol
    }

    pub async fn dispatch(&self, plan: &TransferPlan) -> Result<Dispatched, BroadcastError> {
        let from = self.signer.address(&plan.signer_path)?;
        if let Some(expected) = plan.expected_from
            && expected != from
        {
            return Err(BroadcastError::KeyMismatch {
                path: plan.signer_path.clone(),
                expected: address_key(&expected),
                actual: address_key(&from),
            });
        }
        let counter_key = address_key(&from);

        let chain_count = self.chain.pending_transaction_count(from).await?;
        let nonce = self
            .nonces
            .allocate(&counter_key, plan.claim, plan.recorded_nonce, chain_count)
            .await?;
        if nonce < chain_count {
            return Err(BroadcastError::NonceBehind {
                address: counter_key,
                local: nonce,
                chain: chain_count,
            });
        }
        if nonce > chain_count {
            return Err(BroadcastError::NoncePending {
                address: counter_key,
                local: nonce,
                chain: chain_count,
            });
        }

        let amount = decimal_to_native(plan.amount, self.asset.decimals)?;
        let call = match self.asset.kind.contract() {
            Some(contract) => {
                let available = self.chain.token_balance(contract, from).await?;
                if available < amount {
                    return Err(BroadcastError::InsufficientTokenBalance {
                        available,
                        required: amount,
                    });
                }
                OutboundCall {
                    from,
                    to: contract,
                    value: U256::zero(),
                    data: transfer_call_data(plan.recipient, amount),
                }
            }
            None => OutboundCall {
                from,
                to: plan.recipient,
                value: amount,
                data: Bytes::new(),
            },
        };

        let gas_limit = match plan.gas_limit {
            Some(limit) => limit,
            None => self.chain.estimate_gas(&call).await?,
        };
        let gas_price = match plan.pricing {
            GasPricing::Fixed(price) => price,
            GasPricing::MarketPlusPremium(premium) => self
                .chain
                .gas_price()
                .await?
                .checked_add(premium)
                .ok_or(BroadcastError::FeeOverflow)?,
        };
        let required = gas_limit
            .checked_mul(gas_price)
            .and_then(|fee| fee.checked_add(call.value))
            .ok_or(BroadcastError::FeeOverflow)?;
        let available = self.chain.native_balance(from).await?;
        if available < required {
            return Err(BroadcastError::InsufficientFeeBalance {
                available,
                required,
            });
        }

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(call.to)
            .value(call.value)
            .data(call.data)
            .gas(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();
        let raw = self.signer.sign_transaction(&plan.signer_path, &tx)?;
        let tx_hash = self.chain.send_raw_transaction(raw).await?;

        info!(
            asset = %self.symbol(),
            from = %counter_key,
            nonce,
            tx_hash = %hash_key(&tx_hash),
            gas_limit = %gas_limit,
            gas_price = %gas_price,
            "Broadcast transaction"
        );
        Ok(Dispatched {
            from,
            nonce,
            tx_hash,
        })
    }
}

/// Receiver of partner withdrawal notices.
#[async_trait]
pub trait PartnerNotifier: Send + Sync {
    async fn notify_withdrawal(&self, notice: &PartnerWithdrawalNotice) -> Result<(), ClientError>;
}

#[async_trait]
impl PartnerNotifier for PartnerClient {
    async fn notify_withdrawal(&self, notice: &PartnerWithdrawalNotice) -> Result<(), ClientError> {
        self.add_withdraw_info(notice).await
    }
}

/// Partner routing: withdrawals whose memo matches are reported.
#[derive(Clone)]
pub struct PartnerRoute {
    pub memo: String,
    pub notifier: Arc<dyn PartnerNotifier>,
}

impl PartnerRoute {
    pub fn from_config(config: &PartnerConfig) -> Result<Self, ClientError> {
        let client = PartnerClient::new(
            config.host.clone(),
            config.key.clone(),
            config.secret.clone(),
            config.identify,
        )?;
        Ok(Self {
            memo: config.memo.clone(),
            notifier: Arc::new(client),
        })
    }

    pub fn routes(&self, memo: Option<&str>) -> bool {
        memo == Some(self.memo.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowReport {
    pub sent: usize,
    pub deferred: usize,
    pub failed: usize,
}

/// Drains pending withdrawals of one asset from the hot address.
pub struct WithdrawalFlow {
    broadcaster: Broadcaster,
    hot_path: String,
    gas_price: U256,
    partner: Option<PartnerRoute>,
}

impl WithdrawalFlow {
    /// `gas_price` is used for records that carry no price of their own.
    pub fn new(
        broadcaster: Broadcaster,
        hot_path: String,
        gas_price: U256,
        partner: Option<PartnerRoute>,
    ) -> Self {
        Self {
            broadcaster,
            hot_path,
            gas_price,
            partner,
        }
    }

    pub fn symbol(&self) -> &str {
        self.broadcaster.symbol()
    }

    fn plan(&self, withdrawal: &Withdrawal) -> Result<TransferPlan, BroadcastError> {
        let recipient = withdrawal
            .recipient
            .parse::<Address>()
            .map_err(|_| BroadcastError::InvalidAddress(withdrawal.recipient.clone()))?;
        Ok(TransferPlan {
            claim: NonceClaim::Withdrawal(withdrawal.id),
            recorded_nonce: withdrawal.nonce,
            signer_path: self.hot_path.clone(),
            expected_from: None,
            recipient,
            amount: withdrawal.amount,
            gas_limit: None,
            pricing: GasPricing::Fixed(withdrawal.detail.gas_price.unwrap_or(self.gas_price)),
        })
    }

    pub async fn run(&self) -> Result<FlowReport, BroadcastError> {
        let ledger = &self.broadcaster.ledger;
        let withdrawals = ledger.pending_withdrawals(self.symbol()).await?;

        let mut report = FlowReport::default();
        for withdrawal in withdrawals {
            let dispatched = match self.plan(&withdrawal) {
                Ok(plan) => self.broadcaster.dispatch(&plan).await,
                Err(e) => Err(e),
            };
            match dispatched {
                Ok(dispatched) => {
                    let tx_hash = hash_key(&dispatched.tx_hash);
                    ledger.finish_withdrawal(withdrawal.id, &tx_hash).await?;
                    report.sent += 1;
                    self.notify_partner(&withdrawal, &dispatched).await;
                }
                Err(e) if e.halts_address() => {
                    error!(
                        asset = %self.symbol(),
                        withdrawal_id = withdrawal.id,
                        error = %e,
                        "Nonce behind chain, halting withdrawals"
                    );
                    report.failed += 1;
                    break;
                }
                Err(e @ BroadcastError::NoncePending { .. }) => {
                    debug!(asset = %self.symbol(), withdrawal_id = withdrawal.id, error = %e, "Withdrawal deferred");
                    report.deferred += 1;
                }
                Err(e @ BroadcastError::Ledger(_)) => return Err(e),
                Err(e) => {
                    warn!(asset = %self.symbol(), withdrawal_id = withdrawal.id, error = %e, "Withdrawal not sent");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn notify_partner(&self, withdrawal: &Withdrawal, dispatched: &Dispatched) {
        let Some(partner) = &self.partner else {
            return;
        };
        if !partner.routes(withdrawal.memo.as_deref()) {
            return;
        }
        let notice = PartnerWithdrawalNotice {
            amount: withdrawal.amount.to_string(),
            contract_address: self
                .broadcaster
                .asset
                .kind
                .contract()
                .map(|c| address_key(&c))
                .unwrap_or_default(),
            from: address_key(&dispatched.from),
            to: withdrawal.recipient.clone(),
            txid: hash_key(&dispatched.tx_hash),
        };
        match partner.notifier.notify_withdrawal(&notice).await {
            Ok(()) => info!(withdrawal_id = withdrawal.id, txid = %notice.txid, "Partner notified"),
            Err(e) => error!(
                withdrawal_id = withdrawal.id,
                txid = %notice.txid,
                error = %e,
                "Partner notification failed"
            ),
        }
    }
}

/// Sweeps confirmed, gas-funded deposits of one asset to the collection
/// address.
pub struct CollectionFlow {
    broadcaster: Broadcaster,
    collection_path: String,
    gas_premium: U256,
}

impl CollectionFlow {
    pub fn new(broadcaster: Broadcaster, collection_path: String, gas_premium: U256) -> Self {
        Self {
            broadcaster,
            collection_path,
            gas_premium,
        }
    }

    pub fn symbol(&self) -> &str {
        self.broadcaster.symbol()
    }

    fn plan(&self, deposit: &Deposit, destination: Address) -> Result<TransferPlan, BroadcastError> {
        let owner = deposit
            .detail
            .recipient
            .parse::<Address>()
            .map_err(|_| BroadcastError::InvalidAddress(deposit.detail.recipient.clone()))?;
        Ok(TransferPlan {
            claim: NonceClaim::Deposit(deposit.id),
            recorded_nonce: deposit.detail.nonce,
            signer_path: deposit_path(deposit.client_id, &deposit.addr_path),
            expected_from: Some(owner),
            recipient: destination,
            amount: deposit.amount,
            gas_limit: deposit.detail.gas_limit,
            pricing: GasPricing::MarketPlusPremium(self.gas_premium),
        })
    }

    /// Whether the gas funding of the deposit address has been mined.
    async fn funded(&self, deposit: &Deposit) -> Result<bool, BroadcastError> {
        let Some(funding) = &deposit.detail.funding_tx_hash else {
            return Ok(false);
        };
        let hash = funding
            .parse::<H256>()
            .map_err(|_| BroadcastError::InvalidAddress(funding.clone()))?;
        Ok(self.broadcaster.chain.is_mined(hash).await?)
    }

    pub async fn run(&self) -> Result<FlowReport, BroadcastError> {
        let ledger = &self.broadcaster.ledger;
        let destination = self.broadcaster.signer.address(&self.collection_path)?;
        let deposits = ledger.collectible_deposits(self.symbol()).await?;

        let mut halted: HashSet<String> = HashSet::new();
        let mut report = FlowReport::default();
        for deposit in deposits {
            if halted.contains(&deposit.detail.recipient) {
                report.deferred += 1;
                continue;
            }
            let result = match self.funded(&deposit).await {
                Ok(true) => match self.plan(&deposit, destination) {
                    Ok(plan) => self.broadcaster.dispatch(&plan).await,
                    Err(e) => Err(e),
                },
                Ok(false) => {
                    debug!(asset = %self.symbol(), deposit_id = deposit.id, "Gas funding not mined yet");
                    report.deferred += 1;
                    continue;
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(dispatched) => {
                    let tx_hash = hash_key(&dispatched.tx_hash);
                    ledger.finish_collection(deposit.id, &tx_hash).await?;
                    report.sent += 1;
                }
                Err(e) if e.halts_address() => {
                    error!(
                        asset = %self.symbol(),
                        deposit_id = deposit.id,
                        error = %e,
                        "Nonce behind chain, halting sweeps from address"
                    );
                    halted.insert(deposit.detail.recipient.clone());
                    report.failed += 1;
                }
                Err(e @ BroadcastError::NoncePending { .. }) => {
                    debug!(asset = %self.symbol(), deposit_id = deposit.id, error = %e, "Sweep deferred");
                    report.deferred += 1;
                }
                Err(e @ BroadcastError::Ledger(_)) => return Err(e),
                Err(e) => {
                    warn!(asset = %self.symbol(), deposit_id = deposit.id, error = %e, "Sweep not sent");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
