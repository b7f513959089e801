//! TOML file configuration structures.
//!
//! These structs directly map to the `coinvault.toml` file format. Wei
//! quantities are decimal strings so that values beyond `u64` survive TOML.

use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub chain: ChainConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    pub partner: Option<PartnerConfig>,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub chain_id: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

/// Collection (hot) address settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Derivation path under the account root.
    #[serde(default = "default_collection_path")]
    pub path: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            path: default_collection_path(),
        }
    }
}

fn default_collection_path() -> String {
    coinvault_core::signer::COLLECTION_PATH.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerConfig {
    pub host: Url,
    pub key: String,
    pub secret: String,
    pub identify: u32,
    #[serde(default = "default_partner_memo")]
    pub memo: String,
}

fn default_partner_memo() -> String {
    "partner".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Downstream endpoint receiving deposit notifications.
    pub webhook_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    /// Defaults to the asset itself for native assets.
    pub fee_symbol: Option<String>,
    pub decimals: u32,
    #[serde(default)]
    pub genesis_height: u64,
    /// ERC-20 contract address; absent for the native coin.
    pub contract: Option<String>,
    #[serde(default)]
    pub event: EventConfig,
    pub deposit: DepositConfig,
    pub confirm: ConfirmConfig,
    pub collect: Option<CollectConfig>,
    pub withdrawal: Option<WithdrawalConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_event_signature")]
    pub signature: String,
    #[serde(default = "default_from_field")]
    pub from_field: String,
    #[serde(default = "default_to_field")]
    pub to_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            signature: default_event_signature(),
            from_field: default_from_field(),
            to_field: default_to_field(),
            value_field: default_value_field(),
        }
    }
}

fn default_event_signature() -> String {
    coinvault_core::chain::DEFAULT_TRANSFER_EVENT.to_string()
}

fn default_from_field() -> String {
    "from".to_string()
}

fn default_to_field() -> String {
    "to".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfig {
    pub step: u64,
    pub confirmation_lag: u64,
    /// Native units.
    #[serde(default = "zero")]
    pub min_threshold: String,
    pub pocket_address: Option<String>,
}

fn zero() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmConfig {
    pub threshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Wei added to `eth_gasPrice`.
    #[serde(default = "zero")]
    pub gas_premium: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// Wei.
    pub gas_price: String,
}

/// Task periods in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_deposit_scan")]
    pub deposit_scan_secs: u64,
    #[serde(default = "default_confirmation")]
    pub confirmation_secs: u64,
    #[serde(default = "default_collection")]
    pub collection_secs: u64,
    #[serde(default = "default_withdrawal")]
    pub withdrawal_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            deposit_scan_secs: default_deposit_scan(),
            confirmation_secs: default_confirmation(),
            collection_secs: default_collection(),
            withdrawal_secs: default_withdrawal(),
        }
    }
}

fn default_deposit_scan() -> u64 {
    15
}

fn default_confirmation() -> u64 {
    30
}

fn default_collection() -> u64 {
    60
}

fn default_withdrawal() -> u64 {
    30
}
