//! BIP322 "simple" message signing.
//!
//! The scheme proves control of an address by signing a deterministic pair
//! of zero-value transactions. Both transactions are rebuilt byte-for-byte
//! from `(address, message)` on the verify side, so every constant here
//! (all-zero prevout txid, `0xffffffff` index, zero sequences, version 0)
//! is part of the protocol and must not change.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_RETURN};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    taproot, Amount, EcdsaSighashType, OutPoint, Script, ScriptBuf, Sequence, TapSighashType,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::address::{address_to_script, classify_address, script_for_pubkey};
use crate::error::{Result, WalletError};
use crate::network::WalletNetwork;
use crate::utxo::SpendType;

const TAG: &[u8] = b"BIP0322-signed-message";

/// `sha256(sha256(tag) || sha256(tag) || message)`.
pub fn message_hash(message: &str) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(TAG);
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_ref());
    engine.input(tag_hash.as_ref());
    engine.input(message.as_bytes());
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// The virtual funding transaction: unspendable input whose scriptSig
/// commits to the message hash, one zero-value output at the address.
pub fn to_spend(script_pubkey: &Script, message: &str) -> Transaction {
    let script_sig = Builder::new()
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(message_hash(message))
        .into_script();
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0xffffffff,
            },
            script_sig,
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: script_pubkey.to_owned(),
        }],
    }
}

/// The transaction actually signed: spends `to_spend`'s single output into
/// an OP_RETURN.
pub fn to_sign(to_spend: &Transaction) -> Transaction {
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(to_spend.compute_txid(), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new().push_opcode(OP_RETURN).into_script(),
        }],
    }
}

/// Produce a simple-format signature: the consensus-serialized witness of
/// the `to_sign` input. Supports taproot (schnorr key path) and native
/// segwit v0 (ECDSA) addresses.
pub fn sign_simple(
    secp: &Secp256k1<All>,
    secret: &SecretKey,
    pubkey: &PublicKey,
    spend_type: SpendType,
    message: &str,
) -> Result<Vec<u8>> {
    let script = match spend_type {
        SpendType::P2tr | SpendType::P2wpkh => script_for_pubkey(pubkey, spend_type)?,
        other => {
            return Err(WalletError::UnsupportedSigningScheme(format!(
                "bip322-simple supports P2TR and P2WPKH, not {other:?}"
            )))
        }
    };
    let spend_tx = to_spend(&script, message);
    let sign_tx = to_sign(&spend_tx);
    let prevouts = [spend_tx.output[0].clone()];
    let mut cache = SighashCache::new(&sign_tx);

    let witness = match spend_type {
        SpendType::P2tr => {
            let sighash = cache.taproot_key_spend_signature_hash(
                0,
                &Prevouts::All(&prevouts),
                TapSighashType::All,
            )?;
            let keypair = Keypair::from_secret_key(secp, secret).tap_tweak(secp, None).to_inner();
            let signature = secp.sign_schnorr_with_rng(
                &Message::from_digest(sighash.to_byte_array()),
                &keypair,
                &mut rand::thread_rng(),
            );
            Witness::p2tr_key_spend(&taproot::Signature {
                signature,
                sighash_type: TapSighashType::All,
            })
        }
        _ => {
            let sighash = cache.p2wpkh_signature_hash(
                0,
                &script,
                Amount::ZERO,
                EcdsaSighashType::All,
            )?;
            let signature = bitcoin::ecdsa::Signature {
                signature: secp
                    .sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), secret),
                sighash_type: EcdsaSighashType::All,
            };
            Witness::p2wpkh(&signature, pubkey)
        }
    };
    Ok(encode::serialize(&witness))
}

/// Verify a simple-format signature. `Ok(false)` for any mismatch or
/// malformed witness; errors only when the address itself cannot be
/// checked.
pub fn verify_simple(
    address: &str,
    network: WalletNetwork,
    message: &str,
    signature: &[u8],
) -> Result<bool> {
    let script = address_to_script(address, network)?;
    let spend_type = classify_address(address).spend_type;
    if !matches!(spend_type, SpendType::P2tr | SpendType::P2wpkh) {
        return Err(WalletError::UnsupportedSigningScheme(format!(
            "bip322-simple supports P2TR and P2WPKH, not {spend_type:?}"
        )));
    }

    let witness: Witness = match encode::deserialize(signature) {
        Ok(w) => w,
        Err(_) => return Ok(false),
    };

    let spend_tx = to_spend(&script, message);
    let sign_tx = to_sign(&spend_tx);
    let prevouts = [spend_tx.output[0].clone()];
    let mut cache = SighashCache::new(&sign_tx);

    match spend_type {
        SpendType::P2tr => {
            if witness.len() != 1 {
                return Ok(false);
            }
            let sig_bytes = &witness[0];
            let (sig_bytes, sighash_type) = match sig_bytes.len() {
                64 => (&sig_bytes[..64], TapSighashType::Default),
                65 => {
                    let ty = match TapSighashType::from_consensus_u8(sig_bytes[64]) {
                        Ok(ty) => ty,
                        Err(_) => return Ok(false),
                    };
                    (&sig_bytes[..64], ty)
                }
                _ => return Ok(false),
            };
            let schnorr_sig =
                match bitcoin::secp256k1::schnorr::Signature::from_slice(sig_bytes) {
                    Ok(sig) => sig,
                    Err(_) => return Ok(false),
                };
            let output_key = match XOnlyPublicKey::from_slice(&script.as_bytes()[2..34]) {
                Ok(key) => key,
                Err(_) => return Ok(false),
            };
            let sighash = cache.taproot_key_spend_signature_hash(
                0,
                &Prevouts::All(&prevouts),
                sighash_type,
            )?;
            let secp = Secp256k1::new();
            Ok(secp
                .verify_schnorr(
                    &schnorr_sig,
                    &Message::from_digest(sighash.to_byte_array()),
                    &output_key,
                )
                .is_ok())
        }
        _ => {
            if witness.len() != 2 {
                return Ok(false);
            }
            let pubkey = match PublicKey::from_slice(&witness[1]) {
                Ok(pk) => pk,
                Err(_) => return Ok(false),
            };
            // The witness pubkey must hash to the address program.
            match script_for_pubkey(&pubkey, SpendType::P2wpkh) {
                Ok(derived) if derived == script => {}
                _ => return Ok(false),
            }
            let sig_bytes = &witness[0];
            if sig_bytes.is_empty() {
                return Ok(false);
            }
            let (der, sighash_byte) = sig_bytes.split_at(sig_bytes.len() - 1);
            let sighash_type = EcdsaSighashType::from_consensus(u32::from(sighash_byte[0]));
            let ecdsa_sig = match bitcoin::secp256k1::ecdsa::Signature::from_der(der) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };
            let sighash =
                cache.p2wpkh_signature_hash(0, &script, Amount::ZERO, sighash_type)?;
            let secp = Secp256k1::new();
            Ok(secp
                .verify_ecdsa(
                    &Message::from_digest(sighash.to_byte_array()),
                    &ecdsa_sig,
                    &pubkey,
                )
                .is_ok())
        }
    }
}
