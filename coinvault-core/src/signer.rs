//! Transaction signing keyed by HD derivation path.
//!
//! Every custodial address is a BIP-32 child of one seed under
//! `m/44'/60'/0'/0'`. Deposit addresses live at `{client_id}/{path}`; the
//! collection (hot) address is child `0`.

use coins_bip32::path::DerivationPath;
use coins_bip32::prelude::XPriv;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer as _};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use thiserror::Error;

pub const ACCOUNT_ROOT: &str = "m/44'/60'/0'/0'";

/// Derivation path of the collection address.
pub const COLLECTION_PATH: &str = "0";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid derivation path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Child path of a client's deposit address.
pub fn deposit_path(client_id: i64, addr_path: &str) -> String {
    format!("{client_id}/{addr_path}")
}

pub trait Signer: Send + Sync {
    /// Address controlled by the key at `path`.
    fn address(&self, path: &str) -> Result<Address, SignerError>;

    /// Sign `tx` with the key at `path` and return the RLP-encoded signed
    /// transaction ready for `eth_sendRawTransaction`.
    fn sign_transaction(&self, path: &str, tx: &TypedTransaction) -> Result<Bytes, SignerError>;
}

/// BIP-32 signer over a single master seed.
#[derive(Clone)]
pub struct HdSigner {
    account: XPriv,
}

impl std::fmt::Debug for HdSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdSigner").finish_non_exhaustive()
    }
}

impl HdSigner {
    pub fn from_seed(seed: &[u8]) -> Result<Self, SignerError> {
        let root = XPriv::root_from_seed(seed, None)
            .map_err(|e| SignerError::Derivation(e.to_string()))?;
        let account = root
            .derive_path(&parse_path(ACCOUNT_ROOT)?)
            .map_err(|e| SignerError::Derivation(e.to_string()))?;
        Ok(Self { account })
    }

    fn wallet(&self, path: &str) -> Result<LocalWallet, SignerError> {
        if path.is_empty() {
            return Err(SignerError::InvalidPath {
                path: path.to_owned(),
                reason: "empty path".to_owned(),
            });
        }
        let child_path = parse_path(&format!("m/{path}"))?;
        let child = self
            .account
            .derive_path(&child_path)
            .map_err(|e| SignerError::Derivation(e.to_string()))?;
        let key: &SigningKey = child.as_ref();
        Ok(LocalWallet::from(key.clone()))
    }
}

fn parse_path(path: &str) -> Result<DerivationPath, SignerError> {
    path.parse::<DerivationPath>()
        .map_err(|e| SignerError::InvalidPath {
            path: path.to_owned(),
            reason: e.to_string(),
        })
}

impl Signer for HdSigner {
    fn address(&self, path: &str) -> Result<Address, SignerError> {
        Ok(self.wallet(path)?.address())
    }

    fn sign_transaction(&self, path: &str, tx: &TypedTransaction) -> Result<Bytes, SignerError> {
        let wallet = self.wallet(path)?;
        let mut tx = tx.clone();
        if tx.chain_id().is_none() {
            tx.set_chain_id(wallet.chain_id());
        }
        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(tx.rlp_signed(&signature))
    }
}
