//! Recurring processors of the custody core.
//!
//! - `DepositScanner`: advances an asset's cursor, records deposits, emits
//!   `DepositEvent::Created`
//! - `ConfirmationEngine`: confirms deep-enough deposits and credits accounts,
//!   emits `DepositEvent::Confirmed`
//! - `WithdrawalFlow` / `CollectionFlow`: drive outbound transfers through the
//!   shared `Broadcaster`
//! - `DepositEventPublisher`: receives `DepositEvent`, delivers notifications
//! - `TaskRunner`: runs each of the above on its own period, single-flight

pub mod broadcaster;
pub mod confirmation;
pub mod deposit_scanner;
pub mod event_publisher;
pub mod nonce;
pub mod scheduler;

pub use broadcaster::{
    BroadcastError, Broadcaster, CollectionFlow, FlowReport, GasPricing, PartnerNotifier,
    PartnerRoute, TransferPlan, WithdrawalFlow,
};
pub use confirmation::{ConfirmationEngine, ConfirmationError, ConfirmationReport};
pub use deposit_scanner::{
    DepositScanner, NativeScan, ScanContext, ScanError, ScanReport, ScanStrategy, TokenScan,
};
pub use event_publisher::{DepositEventPublisher, PublishError};
pub use nonce::NonceAllocator;
pub use scheduler::{GuardToken, PeriodicTask, TaskError, TaskGuard, TaskKind, TaskRunner};
