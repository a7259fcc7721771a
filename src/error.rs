//! Error taxonomy for the wallet engine.
//!
//! Every failure is a typed variant so callers can distinguish "add funds"
//! from "this transaction would destroy a collectible" without parsing
//! strings. All errors abort the current build; no partial transaction is
//! ever returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient value UTXOs: need {needed} sats, have {available}")]
    InsufficientUtxo { needed: u64, available: u64 },

    #[error("insufficient asset balance: need {needed}, have {available}")]
    InsufficientAssetUtxo { needed: u128, available: u128 },

    #[error("unsafe UTXO set: {0}")]
    UnsafeUtxoSet(String),

    #[error("asset may be lost: {0}")]
    AssetMaybeLost(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown spend type: {0}")]
    UnknownSpendType(String),

    #[error("no key for public key {0}")]
    UnknownKey(String),

    #[error("unsupported signing scheme: {0}")]
    UnsupportedSigningScheme(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid utxo: {0}")]
    InvalidUtxo(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("signing error: {0}")]
    Signing(String),
}

pub type Result<T> = core::result::Result<T, WalletError>;

impl From<bitcoin::address::ParseError> for WalletError {
    fn from(e: bitcoin::address::ParseError) -> Self {
        WalletError::InvalidAddress(e.to_string())
    }
}

impl From<bitcoin::address::FromScriptError> for WalletError {
    fn from(e: bitcoin::address::FromScriptError) -> Self {
        WalletError::InvalidAddress(e.to_string())
    }
}

impl From<bitcoin::sighash::TaprootError> for WalletError {
    fn from(e: bitcoin::sighash::TaprootError) -> Self {
        WalletError::Signing(e.to_string())
    }
}

impl From<bitcoin::sighash::P2wpkhError> for WalletError {
    fn from(e: bitcoin::sighash::P2wpkhError) -> Self {
        WalletError::Signing(e.to_string())
    }
}

impl From<bitcoin::transaction::InputsIndexError> for WalletError {
    fn from(e: bitcoin::transaction::InputsIndexError) -> Self {
        WalletError::Transaction(e.to_string())
    }
}

impl From<bitcoin::secp256k1::Error> for WalletError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        WalletError::Signing(e.to_string())
    }
}

impl From<bitcoin::consensus::encode::Error> for WalletError {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        WalletError::Transaction(e.to_string())
    }
}

impl From<bitcoin::key::UncompressedPublicKeyError> for WalletError {
    fn from(e: bitcoin::key::UncompressedPublicKeyError) -> Self {
        WalletError::InvalidUtxo(e.to_string())
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(e: hex::FromHexError) -> Self {
        WalletError::InvalidPayload(e.to_string())
    }
}
