//! Bitcoin address encoding, decoding, and classification.
//!
//! The codec converts between public keys, address strings, and output
//! scripts for every spend type the engine signs, and classifies arbitrary
//! address strings into `(network, spend type, dust threshold)` without
//! requiring the caller to know the network up front.

use core::str::FromStr;

use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::{Address, Script, ScriptBuf};

use crate::error::{Result, WalletError};
use crate::network::WalletNetwork;
use crate::utxo::SpendType;

/// Classification result for an arbitrary address string.
///
/// Unrecognized input yields `spend_type == Unknown` with the conservative
/// 546-sat dust floor rather than an error; callers must check for
/// `Unknown` explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressClass {
    pub network: Option<WalletNetwork>,
    pub spend_type: SpendType,
    pub dust_threshold: u64,
}

/// Decode an address into its output script, enforcing the network.
pub fn address_to_script(address: &str, network: WalletNetwork) -> Result<ScriptBuf> {
    let addr = Address::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(network.to_bitcoin())
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?;
    Ok(addr.script_pubkey())
}

/// Render the canonical address for an output script, if one exists.
///
/// Bare and non-standard scripts (OP_RETURN payloads in particular) have no
/// canonical address; callers treat that as an absent value, not an error.
pub fn script_to_address(script: &Script, network: WalletNetwork) -> Option<String> {
    Address::from_script(script, network.to_bitcoin())
        .ok()
        .map(|a| a.to_string())
}

/// Classify an address string by trial decoding: bech32 first, then
/// base58check. Pure function of the input string, so repeated calls are
/// trivially idempotent.
pub fn classify_address(address: &str) -> AddressClass {
    if let Ok((hrp, version, program)) = bech32::segwit::decode(address) {
        let hrp_lower: String = hrp.lowercase_char_iter().collect();
        let network = match hrp_lower.as_str() {
            "bc" => Some(WalletNetwork::Mainnet),
            "tb" => Some(WalletNetwork::Testnet),
            "bcrt" => Some(WalletNetwork::Regtest),
            _ => None,
        };
        let spend_type = match (version.to_u8(), program.len()) {
            (0, 20) => SpendType::P2wpkh,
            (0, 32) => SpendType::P2wsh,
            (1, 32) => SpendType::P2tr,
            _ => SpendType::Unknown,
        };
        return AddressClass {
            network,
            spend_type,
            dust_threshold: spend_type.dust_threshold(),
        };
    }

    if let Ok(payload) = bitcoin::base58::decode_check(address) {
        if payload.len() == 21 {
            let (network, spend_type) = match payload[0] {
                0x00 => (Some(WalletNetwork::Mainnet), SpendType::P2pkh),
                0x05 => (Some(WalletNetwork::Mainnet), SpendType::P2shP2wpkh),
                0x6f => (Some(WalletNetwork::Testnet), SpendType::P2pkh),
                0xc4 => (Some(WalletNetwork::Testnet), SpendType::P2shP2wpkh),
                _ => (None, SpendType::Unknown),
            };
            return AddressClass {
                network,
                spend_type,
                dust_threshold: spend_type.dust_threshold(),
            };
        }
    }

    AddressClass {
        network: None,
        spend_type: SpendType::Unknown,
        dust_threshold: SpendType::Unknown.dust_threshold(),
    }
}

/// Build the output script locking to `pubkey` under the given spend type.
pub fn script_for_pubkey(pubkey: &PublicKey, spend_type: SpendType) -> Result<ScriptBuf> {
    match spend_type {
        SpendType::P2pkh => {
            Ok(ScriptBuf::new_p2pkh(&bitcoin::PublicKey::new(*pubkey).pubkey_hash()))
        }
        SpendType::P2wpkh => {
            let compressed = CompressedPublicKey(*pubkey);
            Ok(ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()))
        }
        SpendType::P2shP2wpkh => {
            let compressed = CompressedPublicKey(*pubkey);
            let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
            Ok(ScriptBuf::new_p2sh(&redeem.script_hash()))
        }
        SpendType::P2tr => {
            let secp = Secp256k1::new();
            let (internal_key, _parity) = pubkey.x_only_public_key();
            Ok(ScriptBuf::new_p2tr(&secp, internal_key, None))
        }
        SpendType::P2wsh | SpendType::Unknown => Err(WalletError::UnknownSpendType(format!(
            "no script constructor for {spend_type:?}"
        ))),
    }
}

/// Render the address for `pubkey` under the given spend type and network.
pub fn address_for_pubkey(
    pubkey: &PublicKey,
    spend_type: SpendType,
    network: WalletNetwork,
) -> Result<String> {
    let script = script_for_pubkey(pubkey, spend_type)?;
    script_to_address(&script, network).ok_or_else(|| {
        WalletError::InvalidAddress(format!("no canonical address for {spend_type:?}"))
    })
}
