//! ERC-20 `Transfer` event decoding and `transfer`/`balanceOf` call data.

use ethers::abi::{Event, ParamType, RawLog, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;

use super::{ChainError, TransferLog};

pub const DEFAULT_TRANSFER_EVENT: &str =
    "event Transfer(address indexed from, address indexed to, uint256 value)";

/// A configured `Transfer`-style event: the ABI signature plus the names of
/// the inputs carrying sender, recipient and amount.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    event: Event,
    from_field: String,
    to_field: String,
    value_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl TransferEvent {
    /// Parse a human-readable event signature such as
    /// `event Transfer(address indexed from, address indexed to, uint256 value)`.
    pub fn parse(
        signature: &str,
        from_field: &str,
        to_field: &str,
        value_field: &str,
    ) -> Result<Self, ChainError> {
        let abi = ethers::abi::parse_abi(&[signature])
            .map_err(|e| ChainError::Abi(format!("{signature}: {e}")))?;
        let event = abi
            .events()
            .next()
            .cloned()
            .ok_or_else(|| ChainError::Abi(format!("no event in {signature:?}")))?;

        let field_kind = |name: &str| {
            event
                .inputs
                .iter()
                .find(|input| input.name == name)
                .map(|input| input.kind.clone())
                .ok_or_else(|| ChainError::Abi(format!("event has no input named {name:?}")))
        };
        for name in [from_field, to_field] {
            if field_kind(name)? != ParamType::Address {
                return Err(ChainError::Abi(format!("input {name:?} is not an address")));
            }
        }
        if !matches!(field_kind(value_field)?, ParamType::Uint(_)) {
            return Err(ChainError::Abi(format!(
                "input {value_field:?} is not an unsigned integer"
            )));
        }

        Ok(Self {
            event,
            from_field: from_field.to_owned(),
            to_field: to_field.to_owned(),
            value_field: value_field.to_owned(),
        })
    }

    pub fn standard() -> Result<Self, ChainError> {
        Self::parse(DEFAULT_TRANSFER_EVENT, "from", "to", "value")
    }

    /// Topic 0 of matching logs.
    pub fn topic(&self) -> H256 {
        self.event.signature()
    }

    /// Decode raw log topics and data into named inputs.
    pub fn decode(&self, topics: Vec<H256>, data: Vec<u8>) -> Result<Vec<(String, Token)>, ChainError> {
        let log = self
            .event
            .parse_log(RawLog { topics, data })
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        Ok(log.params.into_iter().map(|p| (p.name, p.value)).collect())
    }

    /// Pull sender, recipient and amount out of a decoded log.
    pub fn extract(&self, log: &TransferLog) -> Option<DecodedTransfer> {
        let param = |name: &str| {
            log.params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, token)| token.clone())
        };
        Some(DecodedTransfer {
            from: param(&self.from_field)?.into_address()?,
            to: param(&self.to_field)?.into_address()?,
            value: param(&self.value_field)?.into_uint()?,
        })
    }
}

/// Call data for `transfer(address,uint256)`.
pub fn transfer_call_data(to: Address, amount: U256) -> Bytes {
    let mut data = id("transfer(address,uint256)").to_vec();
    data.extend(ethers::abi::encode(&[Token::Address(to), Token::Uint(amount)]));
    data.into()
}

/// Call data for `balanceOf(address)`.
pub fn balance_of_call_data(owner: Address) -> Bytes {
    let mut data = id("balanceOf(address)").to_vec();
    data.extend(ethers::abi::encode(&[Token::Address(owner)]));
    data.into()
}

pub fn decode_balance(output: &[u8]) -> Result<U256, ChainError> {
    ethers::abi::decode(&[ParamType::Uint(256)], output)
        .map_err(|e| ChainError::Abi(e.to_string()))?
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ChainError::Abi("empty balanceOf output".to_owned()))
}
