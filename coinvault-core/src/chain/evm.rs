use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Filter, H256, TransactionRequest, U256, U64,
};
use tracing::debug;

use super::erc20::{balance_of_call_data, decode_balance};
use super::{
    ChainBlock, ChainError, ChainReader, ChainTransaction, OutboundCall, TransferEvent,
    TransferLog,
};

/// [`ChainReader`] backed by an `ethers` JSON-RPC HTTP provider.
///
/// Every request is bounded by `timeout`; an expired request is reported as
/// [`ChainError::Timeout`].
#[derive(Debug, Clone)]
pub struct EvmChainReader {
    provider: Provider<Http>,
    timeout: Duration,
}

impl EvmChainReader {
    pub fn new(rpc_url: &url::Url, timeout: Duration) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url: {e}")))?;
        Ok(Self { provider, timeout })
    }

    async fn bounded<T, F>(&self, request: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ChainError::Timeout)?
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }
}

fn call_request(from: Option<Address>, to: Address, value: U256, data: Bytes) -> TypedTransaction {
    let mut request = TransactionRequest::new().to(to).value(value).data(data);
    if let Some(from) = from {
        request = request.from(from);
    }
    request.into()
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let height = self.bounded(self.provider.get_block_number()).await?;
        Ok(height.as_u64())
    }

    async fn block_with_transactions(&self, number: u64) -> Result<ChainBlock, ChainError> {
        let id = BlockId::Number(BlockNumber::Number(U64::from(number)));
        let block = self
            .bounded(self.provider.get_block_with_txs(id))
            .await?
            .ok_or(ChainError::MissingBlock(number))?;
        let hash = block.hash.ok_or(ChainError::MissingBlock(number))?;
        Ok(ChainBlock {
            number,
            hash,
            transactions: block
                .transactions
                .into_iter()
                .map(|tx| ChainTransaction {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    value: tx.value,
                })
                .collect(),
        })
    }

    async fn receipt_succeeded(&self, tx_hash: H256) -> Result<bool, ChainError> {
        let receipt = self
            .bounded(self.provider.get_transaction_receipt(tx_hash))
            .await?
            .ok_or(ChainError::MissingReceipt(tx_hash))?;
        Ok(receipt.status == Some(U64::one()))
    }

    async fn pending_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        let pending = BlockId::Number(BlockNumber::Pending);
        let count = self
            .bounded(self.provider.get_transaction_count(address, Some(pending)))
            .await?;
        Ok(count.as_u64())
    }

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.bounded(self.provider.get_balance(address, None)).await
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn token_balance(&self, contract: Address, owner: Address) -> Result<U256, ChainError> {
        let tx = call_request(None, contract, U256::zero(), balance_of_call_data(owner));
        let output = self.bounded(self.provider.call(&tx, None)).await?;
        decode_balance(&output)
    }

    async fn estimate_gas(&self, call: &OutboundCall) -> Result<U256, ChainError> {
        let tx = call_request(Some(call.from), call.to, call.value, call.data.clone());
        self.bounded(self.provider.estimate_gas(&tx, None)).await
    }

    async fn transfer_logs(
        &self,
        contract: Address,
        event: &TransferEvent,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, ChainError> {
        let filter = Filter::new()
            .address(contract)
            .topic0(event.topic())
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.bounded(self.provider.get_logs(&filter)).await?;
        debug!(from_block, to_block, logs = logs.len(), "Fetched transfer logs");

        logs.into_iter()
            .filter(|log| log.removed != Some(true))
            .map(|log| {
                let incomplete = || ChainError::Rpc("log without block position".to_owned());
                Ok(TransferLog {
                    block_number: log.block_number.ok_or_else(incomplete)?.as_u64(),
                    block_hash: log.block_hash.ok_or_else(incomplete)?,
                    tx_hash: log.transaction_hash.ok_or_else(incomplete)?,
                    log_index: log.log_index.ok_or_else(incomplete)?.as_u64(),
                    params: event.decode(log.topics, log.data.to_vec())?,
                })
            })
            .collect()
    }

    async fn is_mined(&self, tx_hash: H256) -> Result<bool, ChainError> {
        let tx = self.bounded(self.provider.get_transaction(tx_hash)).await?;
        Ok(tx.is_some_and(|tx| tx.block_number.is_some()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let pending = tokio::time::timeout(self.timeout, self.provider.send_raw_transaction(raw))
            .await
            .map_err(|_| ChainError::Timeout)?
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        Ok(pending.tx_hash())
    }
}

