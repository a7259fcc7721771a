//! In-memory signing engine.
//!
//! The keyring holds keypairs for the duration of a session and signs
//! transaction drafts, free-form messages, and raw digests. Taproot inputs
//! are signed key-path with the BIP341 tweak applied; the tweak must match
//! bit-for-bit or third-party verification fails.

use core::str::FromStr;
use std::collections::BTreeMap;

use bitcoin::hashes::Hash;
use bitcoin::key::{CompressedPublicKey, Keypair, TapTweak};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::sign_message::signed_msg_hash;
use bitcoin::taproot::TapNodeHash;
use bitcoin::{ecdsa, taproot, EcdsaSighashType, ScriptBuf, TapSighashType, Transaction, Witness};

use crate::address::{address_to_script, classify_address, script_for_pubkey};
use crate::bip322;
use crate::error::{Result, WalletError};
use crate::network::WalletNetwork;
use crate::transaction::{ToSignInput, TransactionDraft};
use crate::utxo::SpendType;

/// Message-signing schemes, selected explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScheme {
    /// Legacy deterministic ECDSA over the "Bitcoin Signed Message" digest,
    /// returning the 65-byte compact recoverable form.
    Ecdsa,
    /// BIP322 simple: the serialized witness of the deterministic
    /// zero-value transaction pair.
    Bip322Simple,
}

impl FromStr for MessageScheme {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecdsa" => Ok(MessageScheme::Ecdsa),
            "bip322-simple" => Ok(MessageScheme::Bip322Simple),
            other => Err(WalletError::UnsupportedSigningScheme(other.to_string())),
        }
    }
}

/// Schemes for signing a caller-supplied digest directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSigScheme {
    Ecdsa,
    Schnorr,
}

impl FromStr for RawSigScheme {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecdsa" => Ok(RawSigScheme::Ecdsa),
            "schnorr" => Ok(RawSigScheme::Schnorr),
            other => Err(WalletError::UnsupportedSigningScheme(other.to_string())),
        }
    }
}

/// Taproot signing options shared by all inputs of one draft.
#[derive(Debug, Clone, Copy, Default)]
pub struct TweakOptions {
    /// Script-tree merkle root committed into the key tweak; `None` for a
    /// key-path-only output.
    pub merkle_root: Option<TapNodeHash>,
}

/// Holds keypairs in process memory only; nothing here is ever serialized.
pub struct Keyring {
    keys: BTreeMap<PublicKey, SecretKey>,
    secp: Secp256k1<All>,
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyring {
    pub fn new() -> Self {
        Keyring {
            keys: BTreeMap::new(),
            secp: Secp256k1::new(),
        }
    }

    /// Register a key and return its public key.
    pub fn add_key(&mut self, secret_key: SecretKey) -> PublicKey {
        let public_key = secret_key.public_key(&self.secp);
        self.keys.insert(public_key, secret_key);
        public_key
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.keys.keys().copied().collect()
    }

    fn secret_for(&self, pubkey: &PublicKey) -> Result<SecretKey> {
        self.keys
            .get(pubkey)
            .copied()
            .ok_or_else(|| WalletError::UnknownKey(pubkey.to_string()))
    }

    /// Sign every input listed in the draft, key-path taproot tweaked.
    pub fn sign_draft(&self, draft: &TransactionDraft) -> Result<Transaction> {
        self.sign_draft_with(draft, &TweakOptions::default())
    }

    pub fn sign_draft_with(
        &self,
        draft: &TransactionDraft,
        tweak: &TweakOptions,
    ) -> Result<Transaction> {
        let mut tx = draft.unsigned_tx.clone();
        // Pass one computes signatures against the unsigned transaction,
        // pass two writes the scriptSigs/witnesses.
        let mut patches: Vec<(usize, ScriptBuf, Witness)> = Vec::new();
        {
            let mut cache = SighashCache::new(&tx);
            for entry in &draft.to_sign {
                let prevout = draft.prevouts.get(entry.index).ok_or_else(|| {
                    WalletError::Transaction(format!("no prevout for input {}", entry.index))
                })?;
                let secret = self.secret_for(&entry.pubkey)?;
                let script = &prevout.script_pubkey;

                if script.is_p2tr() {
                    patches.push(self.sign_taproot_input(&mut cache, draft, entry, secret, tweak)?);
                } else if script.is_p2wpkh() {
                    let sighash_type = ecdsa_sighash_type(entry);
                    let sighash = cache.p2wpkh_signature_hash(
                        entry.index,
                        script,
                        prevout.value,
                        sighash_type,
                    )?;
                    let signature = self.ecdsa_sig(sighash.to_byte_array(), &secret, sighash_type);
                    patches.push((
                        entry.index,
                        ScriptBuf::new(),
                        Witness::p2wpkh(&signature, &entry.pubkey),
                    ));
                } else if script.is_p2sh() {
                    // Only nested p2wpkh is supported behind a script hash.
                    let compressed = CompressedPublicKey(entry.pubkey);
                    let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
                    let sighash_type = ecdsa_sighash_type(entry);
                    let sighash = cache.p2wpkh_signature_hash(
                        entry.index,
                        &redeem,
                        prevout.value,
                        sighash_type,
                    )?;
                    let signature = self.ecdsa_sig(sighash.to_byte_array(), &secret, sighash_type);
                    let push = PushBytesBuf::try_from(redeem.into_bytes()).map_err(|_| {
                        WalletError::Signing("redeem script exceeds push limit".to_string())
                    })?;
                    let script_sig = Builder::new().push_slice(push).into_script();
                    patches.push((
                        entry.index,
                        script_sig,
                        Witness::p2wpkh(&signature, &entry.pubkey),
                    ));
                } else if script.is_p2pkh() {
                    let sighash_type = ecdsa_sighash_type(entry);
                    let sighash =
                        cache.legacy_signature_hash(entry.index, script, sighash_type.to_u32())?;
                    let message = Message::from_digest(sighash.to_byte_array());
                    let mut der = self
                        .secp
                        .sign_ecdsa(&message, &secret)
                        .serialize_der()
                        .to_vec();
                    der.push(sighash_type.to_u32() as u8);
                    let sig_push = PushBytesBuf::try_from(der).map_err(|_| {
                        WalletError::Signing("signature exceeds push limit".to_string())
                    })?;
                    let script_sig = Builder::new()
                        .push_slice(sig_push)
                        .push_slice(entry.pubkey.serialize())
                        .into_script();
                    patches.push((entry.index, script_sig, Witness::new()));
                } else {
                    return Err(WalletError::UnsupportedSigningScheme(format!(
                        "no signer for output script of input {}",
                        entry.index
                    )));
                }
            }
        }

        for (index, script_sig, witness) in patches {
            let input = tx.input.get_mut(index).ok_or_else(|| {
                WalletError::Transaction(format!("input index {index} out of range"))
            })?;
            input.script_sig = script_sig;
            input.witness = witness;
        }
        Ok(tx)
    }

    fn sign_taproot_input(
        &self,
        cache: &mut SighashCache<&Transaction>,
        draft: &TransactionDraft,
        entry: &ToSignInput,
        secret: SecretKey,
        tweak: &TweakOptions,
    ) -> Result<(usize, ScriptBuf, Witness)> {
        let sighash_type = taproot_sighash_type(entry)?;
        let sighash = cache.taproot_key_spend_signature_hash(
            entry.index,
            &Prevouts::All(&draft.prevouts),
            sighash_type,
        )?;
        let keypair = Keypair::from_secret_key(&self.secp, &secret);
        let keypair = if entry.disable_tweak {
            keypair
        } else {
            keypair.tap_tweak(&self.secp, tweak.merkle_root).to_inner()
        };
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = self
            .secp
            .sign_schnorr_with_rng(&message, &keypair, &mut rand::thread_rng());
        let signature = taproot::Signature {
            signature,
            sighash_type,
        };
        Ok((
            entry.index,
            ScriptBuf::new(),
            Witness::p2tr_key_spend(&signature),
        ))
    }

    fn ecdsa_sig(
        &self,
        digest: [u8; 32],
        secret: &SecretKey,
        sighash_type: EcdsaSighashType,
    ) -> ecdsa::Signature {
        let message = Message::from_digest(digest);
        ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&message, secret),
            sighash_type,
        }
    }

    /// Sign a free-form message under the selected scheme. `spend_type`
    /// selects the address form for the BIP322 construction and is ignored
    /// by the legacy scheme.
    pub fn sign_message(
        &self,
        pubkey: &PublicKey,
        text: &str,
        scheme: MessageScheme,
        spend_type: SpendType,
    ) -> Result<Vec<u8>> {
        let secret = self.secret_for(pubkey)?;
        match scheme {
            MessageScheme::Ecdsa => {
                let digest = signed_msg_hash(text);
                let message = Message::from_digest(digest.to_byte_array());
                let signature = self.secp.sign_ecdsa_recoverable(&message, &secret);
                let (recovery_id, compact) = signature.serialize_compact();
                let mut out = Vec::with_capacity(65);
                // Keys are always compressed here, hence the +4.
                out.push(27 + recovery_id.to_i32() as u8 + 4);
                out.extend_from_slice(&compact);
                Ok(out)
            }
            MessageScheme::Bip322Simple => {
                bip322::sign_simple(&self.secp, &secret, pubkey, spend_type, text)
            }
        }
    }

    /// Verify a message signature against an address. Returns `Ok(false)`
    /// for a mismatching or malformed signature; errors only for inputs
    /// that cannot be checked at all (bad address, unsupported type).
    ///
    /// Legacy signatures are accepted only with compressed-key headers
    /// (31..=34); address derivation here always uses compressed keys, so
    /// an uncompressed header could never match.
    pub fn verify_message(
        address: &str,
        network: WalletNetwork,
        text: &str,
        signature: &[u8],
        scheme: MessageScheme,
    ) -> Result<bool> {
        match scheme {
            MessageScheme::Ecdsa => {
                let expected = address_to_script(address, network)?;
                if signature.len() != 65 {
                    return Ok(false);
                }
                let header = signature[0];
                // Compressed-key headers only; 27..=30 would imply an
                // uncompressed key and cannot match a derived script.
                if !(31..=34).contains(&header) {
                    return Ok(false);
                }
                let recovery_id = RecoveryId::from_i32(i32::from(header - 31))?;
                let recoverable =
                    match RecoverableSignature::from_compact(&signature[1..65], recovery_id) {
                        Ok(sig) => sig,
                        Err(_) => return Ok(false),
                    };
                let digest = signed_msg_hash(text);
                let message = Message::from_digest(digest.to_byte_array());
                let secp = Secp256k1::new();
                let recovered = match secp.recover_ecdsa(&message, &recoverable) {
                    Ok(pk) => pk,
                    Err(_) => return Ok(false),
                };
                let class = classify_address(address);
                let derived = match script_for_pubkey(&recovered, class.spend_type) {
                    Ok(script) => script,
                    Err(_) => return Ok(false),
                };
                Ok(derived == expected)
            }
            MessageScheme::Bip322Simple => bip322::verify_simple(address, network, text, signature),
        }
    }

    /// Sign a caller-supplied 32-byte digest directly. ECDSA signatures are
    /// DER-encoded, schnorr signatures are the raw 64 bytes.
    pub fn sign_raw_digest(
        &self,
        pubkey: &PublicKey,
        digest_hex: &str,
        scheme: RawSigScheme,
    ) -> Result<Vec<u8>> {
        let secret = self.secret_for(pubkey)?;
        let bytes = hex::decode(digest_hex)?;
        let digest: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            WalletError::InvalidPayload(format!("digest must be 32 bytes, got {}", bytes.len()))
        })?;
        let message = Message::from_digest(digest);
        match scheme {
            RawSigScheme::Ecdsa => Ok(self
                .secp
                .sign_ecdsa(&message, &secret)
                .serialize_der()
                .to_vec()),
            RawSigScheme::Schnorr => {
                let keypair = Keypair::from_secret_key(&self.secp, &secret);
                let signature =
                    self.secp
                        .sign_schnorr_with_rng(&message, &keypair, &mut rand::thread_rng());
                Ok(signature.serialize().to_vec())
            }
        }
    }
}

fn taproot_sighash_type(entry: &ToSignInput) -> Result<TapSighashType> {
    match entry.sighash_types.as_ref().and_then(|v| v.first()) {
        None => Ok(TapSighashType::Default),
        Some(&value) => {
            let byte = u8::try_from(value).map_err(|_| {
                WalletError::Signing(format!("invalid sighash type {value}"))
            })?;
            TapSighashType::from_consensus_u8(byte)
                .map_err(|e| WalletError::Signing(e.to_string()))
        }
    }
}

fn ecdsa_sighash_type(entry: &ToSignInput) -> EcdsaSighashType {
    match entry.sighash_types.as_ref().and_then(|v| v.first()) {
        None => EcdsaSighashType::All,
        Some(&value) => EcdsaSighashType::from_consensus(value),
    }
}
