//! Validated runtime configuration.
//!
//! The server crate parses the TOML file and converts it into these types;
//! processors only ever see the validated form.

mod asset;
mod chain;
mod partner;

pub use asset::{
    AssetConfig, AssetKind, CollectConfig, ConfirmationConfig, DepositConfig, ScheduleConfig,
    WithdrawalConfig,
};
pub use chain::ChainConfig;
pub use partner::PartnerConfig;
