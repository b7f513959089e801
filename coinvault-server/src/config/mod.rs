//! Configuration module for coinvault-server.
//!
//! Handles loading configuration from the TOML file and the environment,
//! and converts it into the validated runtime types of
//! `coinvault_core::config`.

pub mod file;

use crate::config::file::{AssetConfig as FileAssetConfig, FileConfig};
use coinvault_core::chain::TransferEvent;
use coinvault_core::config::{
    AssetConfig, AssetKind, ChainConfig, CollectConfig, ConfirmationConfig, DepositConfig,
    PartnerConfig, ScheduleConfig, WithdrawalConfig,
};
use compact_str::CompactString;
use ethers::types::{Address, U256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// `U256` holds `10^77` but not `10^78`.
const MAX_DECIMALS: u32 = 77;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,

    #[error("COINVAULT_SEED environment variable not set")]
    MissingSeed,

    #[error("COINVAULT_SEED is not valid hex: {0}")]
    InvalidSeed(#[from] hex::FromHexError),
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub chain: ChainConfig,
    pub collection_path: String,
    pub partner: Option<PartnerConfig>,
    pub webhook_url: Option<Url>,
    pub assets: Vec<AssetConfig>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Read, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;
        convert(file_config)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .parse::<Address>()
        .map_err(|_| invalid(format!("{field}: {value:?} is not an address")))
}

fn parse_wei(field: &str, value: &str) -> Result<U256, ConfigError> {
    U256::from_dec_str(value).map_err(|_| invalid(format!("{field}: {value:?} is not an integer")))
}

fn period(symbol: &str, field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(format!("{symbol}.schedule.{field} must be positive")));
    }
    Ok(Duration::from_secs(secs))
}

fn convert(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    if file_config.chain.request_timeout_secs == 0 {
        return Err(invalid("chain.request_timeout_secs must be positive"));
    }
    if file_config.collection.path.is_empty() {
        return Err(invalid("collection.path is empty"));
    }

    let mut seen = HashSet::new();
    let mut assets = Vec::with_capacity(file_config.assets.len());
    for asset in file_config.assets {
        if !seen.insert(asset.symbol.clone()) {
            return Err(invalid(format!("asset {} is configured twice", asset.symbol)));
        }
        assets.push(convert_asset(asset)?);
    }
    if assets.is_empty() {
        return Err(invalid("no assets configured"));
    }

    Ok(LoadedConfig {
        chain: ChainConfig {
            rpc_url: file_config.chain.rpc_url,
            chain_id: file_config.chain.chain_id,
            request_timeout: Duration::from_secs(file_config.chain.request_timeout_secs),
        },
        collection_path: file_config.collection.path,
        partner: file_config.partner.map(|p| PartnerConfig {
            host: p.host,
            key: p.key,
            secret: p.secret,
            identify: p.identify,
            memo: p.memo,
        }),
        webhook_url: file_config.events.webhook_url,
        assets,
    })
}

fn convert_asset(asset: FileAssetConfig) -> Result<AssetConfig, ConfigError> {
    let symbol = asset.symbol.as_str();
    if asset.decimals > MAX_DECIMALS {
        return Err(invalid(format!("{symbol}: decimals {} too large", asset.decimals)));
    }
    if asset.deposit.step == 0 {
        return Err(invalid(format!("{symbol}: deposit.step must be positive")));
    }

    let kind = match &asset.contract {
        Some(contract) => {
            let event = &asset.event;
            AssetKind::Token {
                contract: parse_address(&format!("{symbol}.contract"), contract)?,
                event: TransferEvent::parse(
                    &event.signature,
                    &event.from_field,
                    &event.to_field,
                    &event.value_field,
                )
                .map_err(|e| invalid(format!("{symbol}.event: {e}")))?,
            }
        }
        None => AssetKind::Native,
    };
    let fee_symbol = match (&asset.fee_symbol, &kind) {
        (Some(fee), _) => fee.clone(),
        (None, AssetKind::Native) => asset.symbol.clone(),
        (None, AssetKind::Token { .. }) => {
            return Err(invalid(format!("{symbol}: tokens need a fee_symbol")));
        }
    };

    let pocket_address = asset
        .deposit
        .pocket_address
        .as_deref()
        .map(|a| parse_address(&format!("{symbol}.deposit.pocket_address"), a))
        .transpose()?;
    let collect = asset
        .collect
        .as_ref()
        .map(|c| {
            Ok::<_, ConfigError>(CollectConfig {
                gas_premium: parse_wei(&format!("{symbol}.collect.gas_premium"), &c.gas_premium)?,
            })
        })
        .transpose()?;
    let withdrawal = asset
        .withdrawal
        .as_ref()
        .map(|w| {
            Ok::<_, ConfigError>(WithdrawalConfig {
                gas_price: parse_wei(&format!("{symbol}.withdrawal.gas_price"), &w.gas_price)?,
            })
        })
        .transpose()?;

    let schedule = &asset.schedule;
    Ok(AssetConfig {
        symbol: CompactString::from(symbol),
        fee_symbol: CompactString::from(fee_symbol),
        decimals: asset.decimals,
        genesis_height: asset.genesis_height,
        kind,
        deposit: DepositConfig {
            step: asset.deposit.step,
            confirmation_lag: asset.deposit.confirmation_lag,
            min_threshold: parse_wei(
                &format!("{symbol}.deposit.min_threshold"),
                &asset.deposit.min_threshold,
            )?,
            pocket_address,
        },
        confirmation: ConfirmationConfig {
            threshold: asset.confirm.threshold,
        },
        collect,
        withdrawal,
        schedule: ScheduleConfig {
            deposit_scan: period(symbol, "deposit_scan_secs", schedule.deposit_scan_secs)?,
            confirmation: period(symbol, "confirmation_secs", schedule.confirmation_secs)?,
            collection: period(symbol, "collection_secs", schedule.collection_secs)?,
            withdrawal: period(symbol, "withdrawal_secs", schedule.withdrawal_secs)?,
        },
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

/// Get the signing seed from the environment.
pub fn get_seed() -> Result<Vec<u8>, ConfigError> {
    let seed = std::env::var("COINVAULT_SEED").map_err(|_| ConfigError::MissingSeed)?;
    Ok(hex::decode(seed.trim().trim_start_matches("0x"))?)
}
