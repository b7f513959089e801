//! Per-address nonce allocation.
//!
//! Nonces come from a counter row per signing address, never from the
//! chain. The counter is incremented and the nonce stored on the consuming
//! record in one transaction, so a record keeps its nonce across retries
//! and no nonce is handed out twice.

use std::sync::Arc;

use tracing::debug;

use crate::ledger::{Ledger, LedgerError, NonceClaim, to_u64};

#[derive(Clone)]
pub struct NonceAllocator {
    ledger: Arc<dyn Ledger>,
}

impl NonceAllocator {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Nonce for `claim` on `counter_key`.
    ///
    /// `recorded` is the nonce the record already carries, if any; it is
    /// returned unchanged. `seed` starts a counter that does not exist yet.
    pub async fn allocate(
        &self,
        counter_key: &str,
        claim: NonceClaim,
        recorded: Option<i64>,
        seed: u64,
    ) -> Result<u64, LedgerError> {
        if let Some(nonce) = recorded {
            return to_u64(nonce, "nonce");
        }
        let nonce = self.ledger.allocate_nonce(counter_key, claim, seed).await?;
        debug!(address = %counter_key, claim = ?claim, nonce, "Allocated nonce");
        Ok(nonce)
    }
}
