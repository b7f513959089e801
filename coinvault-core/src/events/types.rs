//! Event type definitions.

use std::fmt;

/// A deposit changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositEvent {
    /// A new unconfirmed deposit was recorded by a scanner.
    Created { deposit_id: i64, coin_symbol: String },
    /// The deposit reached its confirmation depth and was credited.
    Confirmed { deposit_id: i64, coin_symbol: String },
}

impl DepositEvent {
    pub fn deposit_id(&self) -> i64 {
        match self {
            DepositEvent::Created { deposit_id, .. } | DepositEvent::Confirmed { deposit_id, .. } => {
                *deposit_id
            }
        }
    }

    /// Event name as delivered downstream.
    pub fn event_type(&self) -> &'static str {
        match self {
            DepositEvent::Created { .. } => "deposit.created",
            DepositEvent::Confirmed { .. } => "deposit.confirmed",
        }
    }
}

impl fmt::Display for DepositEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.event_type(), self.deposit_id())
    }
}
