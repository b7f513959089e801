//! Event channel factory and handles.

use super::types::DepositEvent;
use tokio::sync::mpsc;
use tracing::error;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type DepositEventSender = mpsc::Sender<DepositEvent>;
pub type DepositEventReceiver = mpsc::Receiver<DepositEvent>;

/// Create a new DepositEvent channel.
///
/// Multiple senders can be cloned from the returned sender.
pub fn deposit_event_channel() -> (DepositEventSender, DepositEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Send, waiting for buffer space when the publisher lags behind. A closed
/// channel drops the event with an error log; the database state it refers
/// to is already committed.
pub async fn publish(sender: &DepositEventSender, event: DepositEvent) {
    if let Err(e) = sender.send(event).await {
        error!(event = %e.0, "Failed to send DepositEvent, channel closed");
    }
}
