//! Node connection configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the node.
    pub rpc_url: url::Url,
    /// EIP-155 chain id used when signing.
    pub chain_id: u64,
    /// Upper bound on any single RPC request.
    pub request_timeout: Duration,
}
