//! Deposit notifications.
//!
//! The scanners and the confirmation engine announce deposit changes on an
//! mpsc channel; the [`DepositEventPublisher`](crate::processors::DepositEventPublisher)
//! forwards them downstream. Events carry identifiers only and consumers
//! re-fetch from the database.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, DepositEventReceiver, DepositEventSender, deposit_event_channel,
    publish,
};
pub use types::DepositEvent;
