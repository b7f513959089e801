//! In-memory doubles of the ledger, the chain and the partner endpoint.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use coinvault_sdk::client::ClientError;
use coinvault_sdk::objects::PartnerWithdrawalNotice;
use compact_str::CompactString;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use rust_decimal::Decimal;
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::chain::{
    ChainBlock, ChainError, ChainReader, ChainTransaction, OutboundCall, TransferEvent,
    TransferLog, address_key, hash_key,
};
use crate::config::{
    AssetConfig, AssetKind, CollectConfig, ConfirmationConfig, DepositConfig, ScheduleConfig,
    WithdrawalConfig,
};
use crate::entities::{
    AddressMapping, Asset, Deposit, DepositDetail, DepositInsert, DepositStatus, Withdrawal,
    WithdrawalDetail, WithdrawalStatus,
};
use crate::ledger::{AssetSeed, Ledger, LedgerError, NonceClaim};
use crate::processors::broadcaster::PartnerNotifier;
use crate::signer::HdSigner;

pub const CHAIN_ID: u64 = 1;

pub fn now() -> time::PrimitiveDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time())
}

pub fn signer() -> HdSigner {
    HdSigner::from_seed(&[42u8; 32]).unwrap()
}

pub fn native_asset() -> AssetConfig {
    AssetConfig {
        symbol: CompactString::const_new("ETH"),
        fee_symbol: CompactString::const_new("ETH"),
        decimals: 18,
        genesis_height: 0,
        kind: AssetKind::Native,
        deposit: DepositConfig {
            step: 20,
            confirmation_lag: 5,
            min_threshold: U256::from(1_000u64),
            pocket_address: None,
        },
        confirmation: ConfirmationConfig { threshold: 12 },
        collect: Some(CollectConfig {
            gas_premium: U256::from(2_000_000_000u64),
        }),
        withdrawal: Some(WithdrawalConfig {
            gas_price: U256::from(10_000_000_000u64),
        }),
        schedule: ScheduleConfig::default(),
    }
}

pub fn token_contract() -> Address {
    Address::repeat_byte(0xc0)
}

pub fn token_asset() -> AssetConfig {
    AssetConfig {
        symbol: CompactString::const_new("USDT"),
        fee_symbol: CompactString::const_new("ETH"),
        decimals: 6,
        kind: AssetKind::Token {
            contract: token_contract(),
            event: TransferEvent::standard().unwrap(),
        },
        deposit: DepositConfig {
            step: 100,
            confirmation_lag: 2,
            min_threshold: U256::from(1_000_000u64),
            pocket_address: None,
        },
        ..native_asset()
    }
}

pub fn asset_seed(asset: &AssetConfig, cursor: i64) -> AssetSeed {
    AssetSeed {
        symbol: asset.symbol.to_string(),
        chain_id: CHAIN_ID as i64,
        fee_symbol: asset.fee_symbol.to_string(),
        genesis_height: cursor,
    }
}

pub fn detail(height: i64, sender: Address, recipient: Address) -> DepositDetail {
    DepositDetail {
        block_hash: hash_key(&H256::from_low_u64_be(height as u64)),
        block_height: height,
        sender: address_key(&sender),
        recipient: address_key(&recipient),
        ..Default::default()
    }
}

#[derive(Default)]
struct LedgerState {
    assets: HashMap<String, Asset>,
    addresses: HashMap<String, AddressMapping>,
    deposits: BTreeMap<i64, Deposit>,
    withdrawals: BTreeMap<i64, Withdrawal>,
    accounts: HashMap<(i64, String), Decimal>,
    counters: HashMap<String, i64>,
    next_id: i64,
    commits: Vec<u64>,
    fail_commit_at: Option<u64>,
    fail_get_deposit: Option<i64>,
}

/// [`Ledger`] kept in memory. A single mutex stands in for row locks.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_address(&self, client_id: i64, path: &str, address: Address) {
        let mapping = AddressMapping {
            client_id,
            path: path.to_string(),
            address: address_key(&address),
        };
        self.state
            .lock()
            .await
            .addresses
            .insert(mapping.address.clone(), mapping);
    }

    pub async fn insert_deposit(&self, insert: DepositInsert, status: DepositStatus) -> i64 {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.deposits.insert(id, deposit_row(id, insert, status));
        id
    }

    pub async fn insert_withdrawal(
        &self,
        coin_symbol: &str,
        recipient: Address,
        amount: &str,
        nonce: Option<i64>,
        memo: Option<&str>,
        gas_price: Option<U256>,
    ) -> i64 {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.withdrawals.insert(
            id,
            Withdrawal {
                id,
                client_id: 1,
                coin_symbol: coin_symbol.to_string(),
                recipient: address_key(&recipient),
                amount: amount.parse().unwrap(),
                status: WithdrawalStatus::Created,
                tx_hash: None,
                nonce,
                memo: memo.map(str::to_string),
                detail: Json(WithdrawalDetail { gas_price }),
                created_at: now(),
            },
        );
        id
    }

    pub async fn set_counter(&self, key: &str, value: i64) {
        self.state.lock().await.counters.insert(key.to_string(), value);
    }

    pub async fn counter(&self, key: &str) -> Option<i64> {
        self.state.lock().await.counters.get(key).copied()
    }

    pub async fn cursor(&self, symbol: &str) -> Option<i64> {
        self.state.lock().await.assets.get(symbol).map(|a| a.cursor)
    }

    pub async fn deposits(&self) -> Vec<Deposit> {
        self.state.lock().await.deposits.values().cloned().collect()
    }

    pub async fn deposit(&self, id: i64) -> Deposit {
        self.state.lock().await.deposits[&id].clone()
    }

    pub async fn withdrawal(&self, id: i64) -> Withdrawal {
        self.state.lock().await.withdrawals[&id].clone()
    }

    /// Heights passed to `commit_block`, in call order.
    pub async fn commits(&self) -> Vec<u64> {
        self.state.lock().await.commits.clone()
    }

    pub async fn fail_commit_at(&self, height: u64) {
        self.state.lock().await.fail_commit_at = Some(height);
    }

    pub async fn fail_get_deposit(&self, id: i64) {
        self.state.lock().await.fail_get_deposit = Some(id);
    }
}

fn deposit_row(id: i64, insert: DepositInsert, status: DepositStatus) -> Deposit {
    Deposit {
        id,
        client_id: insert.client_id,
        addr_path: insert.addr_path,
        coin_symbol: insert.coin_symbol,
        tx_hash: insert.tx_hash,
        amount: insert.amount,
        fee_amount: insert.fee_amount,
        fee_symbol: insert.fee_symbol,
        status,
        detail: Json(insert.detail),
        created_at: now(),
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn load_asset(&self, seed: &AssetSeed) -> Result<Asset, LedgerError> {
        let mut state = self.state.lock().await;
        let asset = state
            .assets
            .entry(seed.symbol.clone())
            .or_insert_with(|| Asset {
                symbol: seed.symbol.clone(),
                chain_id: seed.chain_id,
                fee_symbol: seed.fee_symbol.clone(),
                cursor: seed.genesis_height,
                updated_at: now(),
            });
        Ok(asset.clone())
    }

    async fn find_address(&self, address: &Address) -> Result<Option<AddressMapping>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.addresses.get(&address_key(address)).cloned())
    }

    async fn deposit_exists(&self, coin_symbol: &str, tx_hash: &str) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .values()
            .any(|d| d.coin_symbol == coin_symbol && d.tx_hash == tx_hash))
    }

    async fn commit_block(
        &self,
        coin_symbol: &str,
        height: u64,
        deposits: &[DepositInsert],
    ) -> Result<Vec<i64>, LedgerError> {
        let mut state = self.state.lock().await;
        if state.fail_commit_at == Some(height) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        if !state.assets.contains_key(coin_symbol) {
            return Err(LedgerError::NotFound(format!("asset {coin_symbol}")));
        }

        let mut inserted = Vec::new();
        for insert in deposits {
            let duplicate = state
                .deposits
                .values()
                .any(|d| d.coin_symbol == insert.coin_symbol && d.tx_hash == insert.tx_hash);
            if duplicate {
                continue;
            }
            state.next_id += 1;
            let id = state.next_id;
            state
                .deposits
                .insert(id, deposit_row(id, insert.clone(), DepositStatus::Unconfirmed));
            inserted.push(id);
        }
        if let Some(asset) = state.assets.get_mut(coin_symbol) {
            asset.cursor = asset.cursor.max(height as i64);
        }
        state.commits.push(height);
        Ok(inserted)
    }

    async fn unconfirmed_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .values()
            .filter(|d| d.coin_symbol == coin_symbol && d.status == DepositStatus::Unconfirmed)
            .cloned()
            .collect())
    }

    async fn get_deposit(&self, id: i64) -> Result<Option<Deposit>, LedgerError> {
        let state = self.state.lock().await;
        if state.fail_get_deposit == Some(id) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state.deposits.get(&id).cloned())
    }

    async fn confirm_deposit(&self, id: i64) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        let deposit = state
            .deposits
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("deposit {id}")))?;
        if deposit.status != DepositStatus::Unconfirmed {
            return Ok(false);
        }
        deposit.status = DepositStatus::Confirmed;
        let key = (deposit.client_id, deposit.coin_symbol.clone());
        let amount = deposit.amount;
        *state.accounts.entry(key).or_default() += amount;
        Ok(true)
    }

    async fn account_balance(
        &self,
        client_id: i64,
        coin_symbol: &str,
    ) -> Result<Decimal, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&(client_id, coin_symbol.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn collectible_deposits(&self, coin_symbol: &str) -> Result<Vec<Deposit>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .values()
            .filter(|d| {
                d.coin_symbol == coin_symbol
                    && d.status == DepositStatus::Confirmed
                    && d.detail.funding_tx_hash.is_some()
                    && d.detail.collect_tx_hash.is_none()
            })
            .cloned()
            .collect())
    }

    async fn pending_withdrawals(&self, coin_symbol: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| {
                w.coin_symbol == coin_symbol
                    && w.status == WithdrawalStatus::Created
                    && w.tx_hash.is_none()
            })
            .cloned()
            .collect();
        pending.sort_by_key(|w| (w.nonce.is_none(), w.nonce, w.id));
        Ok(pending)
    }

    async fn allocate_nonce(
        &self,
        counter_key: &str,
        claim: NonceClaim,
        seed: u64,
    ) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().await;
        let existing = match claim {
            NonceClaim::Deposit(id) => state
                .deposits
                .get(&id)
                .ok_or_else(|| LedgerError::NotFound(format!("deposit {id}")))?
                .detail
                .nonce,
            NonceClaim::Withdrawal(id) => state
                .withdrawals
                .get(&id)
                .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {id}")))?
                .nonce,
        };
        if let Some(nonce) = existing {
            return Ok(nonce as u64);
        }

        let counter = state
            .counters
            .entry(counter_key.to_string())
            .or_insert(seed as i64);
        let nonce = *counter;
        *counter += 1;
        match claim {
            NonceClaim::Deposit(id) => {
                if let Some(d) = state.deposits.get_mut(&id) {
                    d.detail.nonce = Some(nonce);
                }
            }
            NonceClaim::Withdrawal(id) => {
                if let Some(w) = state.withdrawals.get_mut(&id) {
                    w.nonce = Some(nonce);
                }
            }
        }
        Ok(nonce as u64)
    }

    async fn finish_withdrawal(&self, id: i64, tx_hash: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let withdrawal = state
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {id}")))?;
        withdrawal.tx_hash = Some(tx_hash.to_string());
        withdrawal.status = WithdrawalStatus::Finished;
        Ok(())
    }

    async fn finish_collection(&self, id: i64, collect_tx_hash: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let deposit = state
            .deposits
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("deposit {id}")))?;
        deposit.detail.collect_tx_hash = Some(collect_tx_hash.to_string());
        deposit.status = DepositStatus::Finished;
        Ok(())
    }
}

#[derive(Default)]
struct ChainState {
    height: u64,
    blocks: HashMap<u64, ChainBlock>,
    failed_receipts: HashSet<H256>,
    tx_counts: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    token_balances: HashMap<(Address, Address), U256>,
    gas_price: U256,
    gas_estimate: U256,
    logs: Vec<(Address, TransferLog)>,
    mined: HashSet<H256>,
    sent: Vec<Bytes>,
    failing_blocks: HashSet<u64>,
    fail_logs: bool,
    bump_on_send: Option<Address>,
    delay: Option<Duration>,
}

/// Scriptable [`ChainReader`]. Blocks that were never added are empty.
pub struct MockChain {
    state: StdMutex<ChainState>,
}

impl MockChain {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            state: StdMutex::new(ChainState {
                height,
                gas_price: U256::from(1_000_000_000u64),
                gas_estimate: U256::from(60_000u64),
                ..Default::default()
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_height(&self, height: u64) {
        self.with(|s| s.height = height);
    }

    /// Add a native transfer to block `number` and return its hash.
    pub fn add_transfer(&self, number: u64, from: Address, to: Option<Address>, value: U256) -> H256 {
        self.with(|s| {
            let block = s.blocks.entry(number).or_insert_with(|| ChainBlock {
                number,
                hash: H256::from_low_u64_be(number),
                transactions: Vec::new(),
            });
            let hash = H256::from(keccak256(
                format!("{number}:{}", block.transactions.len()).as_bytes(),
            ));
            block.transactions.push(ChainTransaction { hash, from, to, value });
            hash
        })
    }

    pub fn fail_receipt(&self, hash: H256) {
        self.with(|s| s.failed_receipts.insert(hash));
    }

    pub fn fail_block(&self, number: u64) {
        self.with(|s| s.failing_blocks.insert(number));
    }

    pub fn fail_logs(&self) {
        self.with(|s| s.fail_logs = true);
    }

    pub fn add_log(&self, contract: Address, log: TransferLog) {
        self.with(|s| s.logs.push((contract, log)));
    }

    pub fn set_tx_count(&self, address: Address, count: u64) {
        self.with(|s| s.tx_counts.insert(address, count));
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.with(|s| s.balances.insert(address, balance));
    }

    pub fn set_token_balance(&self, contract: Address, owner: Address, balance: U256) {
        self.with(|s| s.token_balances.insert((contract, owner), balance));
    }

    pub fn set_gas_price(&self, price: U256) {
        self.with(|s| s.gas_price = price);
    }

    pub fn mine(&self, hash: H256) {
        self.with(|s| s.mined.insert(hash));
    }

    /// Each accepted broadcast raises `address`'s pending count by one.
    pub fn bump_on_send(&self, address: Address) {
        self.with(|s| s.bump_on_send = Some(address));
    }

    /// Delay every `block_number` call.
    pub fn set_delay(&self, delay: Duration) {
        self.with(|s| s.delay = Some(delay));
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.with(|s| s.sent.clone())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        if let Some(delay) = self.with(|s| s.delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with(|s| s.height))
    }

    async fn block_with_transactions(&self, number: u64) -> Result<ChainBlock, ChainError> {
        self.with(|s| {
            if s.failing_blocks.contains(&number) {
                return Err(ChainError::Rpc(format!("block {number} unavailable")));
            }
            Ok(s.blocks.get(&number).cloned().unwrap_or_else(|| ChainBlock {
                number,
                hash: H256::from_low_u64_be(number),
                transactions: Vec::new(),
            }))
        })
    }

    async fn receipt_succeeded(&self, tx_hash: H256) -> Result<bool, ChainError> {
        Ok(self.with(|s| !s.failed_receipts.contains(&tx_hash)))
    }

    async fn pending_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.with(|s| s.tx_counts.get(&address).copied().unwrap_or_default()))
    }

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.with(|s| s.balances.get(&address).copied().unwrap_or_default()))
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(self.with(|s| s.gas_price))
    }

    async fn token_balance(&self, contract: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(self.with(|s| {
            s.token_balances
                .get(&(contract, owner))
                .copied()
                .unwrap_or_default()
        }))
    }

    async fn estimate_gas(&self, _call: &OutboundCall) -> Result<U256, ChainError> {
        Ok(self.with(|s| s.gas_estimate))
    }

    async fn transfer_logs(
        &self,
        contract: Address,
        _event: &TransferEvent,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, ChainError> {
        self.with(|s| {
            if s.fail_logs {
                return Err(ChainError::Timeout);
            }
            Ok(s.logs
                .iter()
                .filter(|(c, log)| {
                    *c == contract && (from_block..=to_block).contains(&log.block_number)
                })
                .map(|(_, log)| log.clone())
                .collect())
        })
    }

    async fn is_mined(&self, tx_hash: H256) -> Result<bool, ChainError> {
        Ok(self.with(|s| s.mined.contains(&tx_hash)))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        Ok(self.with(|s| {
            s.sent.push(raw.clone());
            if let Some(address) = s.bump_on_send {
                *s.tx_counts.entry(address).or_default() += 1;
            }
            H256::from(keccak256(raw.as_ref()))
        }))
    }
}

/// Records partner notices instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: StdMutex<Vec<PartnerWithdrawalNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<PartnerWithdrawalNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartnerNotifier for RecordingNotifier {
    async fn notify_withdrawal(&self, notice: &PartnerWithdrawalNotice) -> Result<(), ClientError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
