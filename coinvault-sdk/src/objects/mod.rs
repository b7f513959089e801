pub mod deposit;
pub mod partner;

pub use deposit::{DepositNotification, DepositStatus};
pub use partner::PartnerWithdrawalNotice;
