//! UTXO classification, sizing, and asset-safety model.
//!
//! Every UTXO carries a [`SpendType`] that determines its witness shape, its
//! marginal virtual-size cost as a fee input, and its dust floor. UTXOs also
//! carry the token-protocol payloads an indexer attributed to them; the
//! safety predicates here gate whether a set may be spent as plain fee or
//! change material.

use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// The spend types this engine can size and sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpendType {
    P2pkh,
    P2shP2wpkh,
    P2wpkh,
    P2wsh,
    P2tr,
    Unknown,
}

impl SpendType {
    /// Marginal virtual size one more input of this type adds to a
    /// transaction, in vbytes. Fractional because witness bytes carry the
    /// segwit discount.
    ///
    /// Unrecognized types are a hard error: silently defaulting would
    /// undercount fees and risk mempool rejection.
    pub fn input_vsize(&self) -> Result<f64> {
        match self {
            SpendType::P2pkh => Ok(148.0),
            SpendType::P2shP2wpkh => Ok(91.0),
            SpendType::P2wpkh => Ok(68.0),
            SpendType::P2tr => Ok(57.5),
            SpendType::P2wsh => Err(WalletError::UnknownSpendType(
                "P2WSH inputs have no generic witness shape".to_string(),
            )),
            SpendType::Unknown => Err(WalletError::UnknownSpendType(
                "cannot size an unclassified input".to_string(),
            )),
        }
    }

    /// Dust floor for outputs locked to this spend type.
    pub fn dust_threshold(&self) -> u64 {
        match self {
            SpendType::P2wpkh => 294,
            SpendType::P2tr => 330,
            _ => 546,
        }
    }
}

/// Location of an inscription within a UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionPayload {
    pub inscription_id: String,
    /// Byte offset of the inscribed sat within the UTXO's value range.
    pub offset: u64,
}

/// A fungible protocol-token balance attributed to a UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub ticker: String,
    pub amount: u128,
}

/// Identifies a rune by its etching location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuneId {
    pub block: u64,
    pub tx: u32,
}

/// A rune balance attributed to a UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunePayload {
    pub rune_id: RuneId,
    pub amount: u128,
}

/// A spendable transaction output as reported by an external indexer.
///
/// Consumed exactly once by the assembler; never mutated after being added
/// as an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub spend_type: SpendType,
    /// The key that will authorize the spend.
    pub pubkey: PublicKey,
    pub script_pubkey: ScriptBuf,
    /// Full parent transaction, required by some legacy signing flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_parent_tx: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inscriptions: Vec<InscriptionPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runes: Vec<RunePayload>,
}

impl UnspentOutput {
    /// Whether this UTXO carries any payload that must not be burned as fee.
    pub fn has_protected_asset(&self) -> bool {
        !self.inscriptions.is_empty() || !self.tokens.is_empty() || !self.runes.is_empty()
    }
}

/// True if any UTXO in the set carries inscription, token, or rune payloads.
pub fn has_protected_asset(utxos: &[UnspentOutput]) -> bool {
    utxos.iter().any(UnspentOutput::has_protected_asset)
}

/// Hard precondition gate before a UTXO set may be spent purely as
/// fee/change material. Violations abort the whole build: dropping a
/// protected asset into a fee output is an irreversible loss.
pub fn ensure_safe_fee_pool(utxos: &[UnspentOutput]) -> Result<()> {
    for utxo in utxos {
        if utxo.has_protected_asset() {
            return Err(WalletError::UnsafeUtxoSet(format!(
                "UTXO {}:{} carries asset payloads and cannot be spent as fee",
                utxo.txid, utxo.vout
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    pub(crate) fn dummy_pubkey() -> PublicKey {
        // Generator point; fine for structural tests.
        PublicKey::from_slice(
            &hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap(),
        )
        .unwrap()
    }

    fn utxo(value: u64) -> UnspentOutput {
        UnspentOutput {
            txid: Txid::all_zeros(),
            vout: 0,
            value,
            spend_type: SpendType::P2tr,
            pubkey: dummy_pubkey(),
            script_pubkey: ScriptBuf::new(),
            raw_parent_tx: None,
            inscriptions: Vec::new(),
            tokens: Vec::new(),
            runes: Vec::new(),
        }
    }

    #[test]
    fn test_input_vsize_table() {
        assert_eq!(SpendType::P2pkh.input_vsize().unwrap(), 148.0);
        assert_eq!(SpendType::P2shP2wpkh.input_vsize().unwrap(), 91.0);
        assert_eq!(SpendType::P2wpkh.input_vsize().unwrap(), 68.0);
        assert_eq!(SpendType::P2tr.input_vsize().unwrap(), 57.5);
        assert!(matches!(
            SpendType::Unknown.input_vsize(),
            Err(WalletError::UnknownSpendType(_))
        ));
        assert!(matches!(
            SpendType::P2wsh.input_vsize(),
            Err(WalletError::UnknownSpendType(_))
        ));
    }

    #[test]
    fn test_dust_thresholds() {
        assert_eq!(SpendType::P2wpkh.dust_threshold(), 294);
        assert_eq!(SpendType::P2tr.dust_threshold(), 330);
        assert_eq!(SpendType::P2pkh.dust_threshold(), 546);
        assert_eq!(SpendType::Unknown.dust_threshold(), 546);
    }

    #[test]
    fn test_protected_asset_gate() {
        let clean = utxo(1000);
        let mut inscribed = utxo(2000);
        inscribed.inscriptions.push(InscriptionPayload {
            inscription_id: "abc123i0".to_string(),
            offset: 0,
        });

        assert!(!has_protected_asset(&[clean.clone()]));
        assert!(has_protected_asset(&[clean.clone(), inscribed.clone()]));

        assert!(ensure_safe_fee_pool(&[clean.clone()]).is_ok());
        assert!(matches!(
            ensure_safe_fee_pool(&[clean, inscribed]),
            Err(WalletError::UnsafeUtxoSet(_))
        ));
    }

    #[test]
    fn test_rune_payload_marks_protected() {
        let mut u = utxo(546);
        u.runes.push(RunePayload {
            rune_id: RuneId { block: 840000, tx: 1 },
            amount: 1000,
        });
        assert!(u.has_protected_asset());
    }
}
