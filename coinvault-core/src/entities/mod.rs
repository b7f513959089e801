pub mod account;
pub mod address;
pub mod asset;
pub mod deposit;
pub mod nonce_counter;
pub mod withdrawal;

pub use account::Account;
pub use address::AddressMapping;
pub use asset::Asset;
pub use deposit::{Deposit, DepositDetail, DepositInsert};
pub use nonce_counter::NonceCounter;
pub use withdrawal::{Withdrawal, WithdrawalDetail};

use coinvault_sdk::objects::DepositStatus as SdkDepositStatus;

/// Deposit lifecycle for database operations.
///
/// This is the sqlx::Type version. For the notification DTO, see
/// `coinvault_sdk::objects::DepositStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "deposit_status")]
pub enum DepositStatus {
    Unconfirmed,
    Confirmed,
    Finished,
}

impl From<DepositStatus> for SdkDepositStatus {
    fn from(value: DepositStatus) -> Self {
        match value {
            DepositStatus::Unconfirmed => SdkDepositStatus::Unconfirmed,
            DepositStatus::Confirmed => SdkDepositStatus::Confirmed,
            DepositStatus::Finished => SdkDepositStatus::Finished,
        }
    }
}

impl From<SdkDepositStatus> for DepositStatus {
    fn from(value: SdkDepositStatus) -> Self {
        match value {
            SdkDepositStatus::Unconfirmed => DepositStatus::Unconfirmed,
            SdkDepositStatus::Confirmed => DepositStatus::Confirmed,
            SdkDepositStatus::Finished => DepositStatus::Finished,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "withdrawal_status")]
pub enum WithdrawalStatus {
    Created,
    Finished,
}
