//! Read and broadcast access to the EVM node.
//!
//! Processors talk to the chain only through [`ChainReader`], so the
//! scanners and the broadcaster can be exercised without a live node.

pub mod erc20;
pub mod evm;

pub use erc20::{DEFAULT_TRANSFER_EVENT, DecodedTransfer, TransferEvent};
pub use evm::EvmChainReader;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use thiserror::Error;

/// Errors talking to the chain. All of them are recoverable: the task that
/// hit one gives up for this tick and retries on the next.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("rpc request timed out")]
    Timeout,

    #[error("block {0} not available")]
    MissingBlock(u64),

    #[error("receipt for {0:#x} not available")]
    MissingReceipt(H256),

    #[error("abi error: {0}")]
    Abi(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// A transaction as seen inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: H256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: H256,
    pub transactions: Vec<ChainTransaction>,
}

/// A decoded `Transfer` log. `params` holds the event inputs by name.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLog {
    pub block_number: u64,
    pub block_hash: H256,
    pub tx_hash: H256,
    pub log_index: u64,
    pub params: Vec<(String, Token)>,
}

/// The parts of an outbound transaction needed to estimate its gas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block height.
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn block_with_transactions(&self, number: u64) -> Result<ChainBlock, ChainError>;

    /// Whether the transaction executed successfully.
    async fn receipt_succeeded(&self, tx_hash: H256) -> Result<bool, ChainError>;

    /// Transaction count of `address` including pending transactions, i.e.
    /// the next nonce the node expects.
    async fn pending_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;

    /// ERC-20 `balanceOf(owner)`.
    async fn token_balance(&self, contract: Address, owner: Address) -> Result<U256, ChainError>;

    async fn estimate_gas(&self, call: &OutboundCall) -> Result<U256, ChainError>;

    /// Transfer logs emitted by `contract` in `[from_block, to_block]`.
    async fn transfer_logs(
        &self,
        contract: Address,
        event: &TransferEvent,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, ChainError>;

    /// Whether the transaction has been included in a block.
    async fn is_mined(&self, tx_hash: H256) -> Result<bool, ChainError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;
}

/// Canonical lowercase `0x` form used as the ledger key for an address.
pub fn address_key(address: &Address) -> String {
    format!("{address:#x}")
}

/// Canonical lowercase `0x` form of a transaction hash.
pub fn hash_key(hash: &H256) -> String {
    format!("{hash:#x}")
}
