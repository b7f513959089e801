//! Deposit event payloads delivered to downstream consumers.

use serde::{Deserialize, Serialize};

/// Deposit status for event payloads.
///
/// This is the DTO version without sqlx::Type.
/// For database operations, use the version in `coinvault-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Unconfirmed,
    Confirmed,
    Finished,
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositStatus::Unconfirmed => write!(f, "unconfirmed"),
            DepositStatus::Confirmed => write!(f, "confirmed"),
            DepositStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Payload published whenever a deposit is created or changes status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositNotification {
    /// `deposit.created` or `deposit.confirmed`.
    pub event_type: String,
    pub deposit_id: i64,
    pub client_id: i64,
    pub coin_symbol: String,
    pub tx_hash: String,
    /// Fixed-point amount with 8 fractional digits.
    pub amount: String,
    pub status: DepositStatus,
    pub block_height: i64,
    pub timestamp: i64,
}
