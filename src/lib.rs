//! UTXO wallet transaction-construction and signing engine.
//!
//! The crate builds and signs Bitcoin transactions with fee-aware coin
//! selection and asset-safety guarantees across the token protocols that
//! ride on top of plain value: inscriptions, fungible protocol tokens, and
//! runes.
//!
//! ## Modules
//!
//! - [`network`]: network parameter management
//! - [`address`]: address/script/pubkey conversions and classification
//! - [`utxo`]: the UTXO model, sizing tables, and safety predicates
//! - [`transaction`]: the mutable transaction assembler and fee selection
//! - [`estimator`]: disposable signers for vsize measurement
//! - [`keyring`]: in-memory signing engine (transactions, messages, digests)
//! - [`bip322`]: the zero-value message-signing construction
//! - [`runestone`]: rune edict payload encoding
//! - [`transfer`]: the four asset-transfer builders
//!
//! The core performs no I/O: UTXO lists, fee rates, and addresses come in
//! as call parameters, and drafts plus to-sign metadata come back out.

pub mod address;
pub mod bip322;
pub mod error;
pub mod estimator;
pub mod keyring;
pub mod network;
pub mod runestone;
pub mod transaction;
pub mod transfer;
pub mod utxo;

pub use error::{Result, WalletError};

pub mod prelude {
    //! Everything a typical integration needs in one import.

    pub use crate::address::{
        address_for_pubkey, address_to_script, classify_address, script_to_address, AddressClass,
    };
    pub use crate::error::{Result, WalletError};
    pub use crate::estimator::EstimateSigner;
    pub use crate::keyring::{Keyring, MessageScheme, RawSigScheme, TweakOptions};
    pub use crate::network::WalletNetwork;
    pub use crate::runestone::Edict;
    pub use crate::transaction::{
        FeeSummary, ToSignInput, TransactionDraft, TxAssembler,
    };
    pub use crate::transfer::{
        build_btc_transfer, build_inscription_transfer, build_inscriptions_transfer,
        build_rune_transfer, build_token_transfer, SendAmount, TransferDraft,
    };
    pub use crate::utxo::{
        ensure_safe_fee_pool, has_protected_asset, InscriptionPayload, RuneId, RunePayload,
        SpendType, TokenPayload, UnspentOutput,
    };
}
