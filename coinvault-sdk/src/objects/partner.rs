//! Partner exchange withdrawal notification.

use serde::{Deserialize, Serialize};

/// A broadcast withdrawal reported to the partner exchange.
///
/// `contract_address` is empty for native-asset withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerWithdrawalNotice {
    pub amount: String,
    pub contract_address: String,
    pub from: String,
    pub to: String,
    pub txid: String,
}

impl PartnerWithdrawalNotice {
    /// Flatten the notice into partner query parameters, without the
    /// signature.
    pub fn to_params(&self, key: &str, identify: u32) -> Vec<(&'static str, String)> {
        vec![
            ("amount", self.amount.clone()),
            ("contractAddress", self.contract_address.clone()),
            ("from", self.from.clone()),
            ("identify", identify.to_string()),
            ("key", key.to_owned()),
            ("to", self.to.clone()),
            ("txid", self.txid.clone()),
        ]
    }
}
