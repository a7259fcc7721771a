//! Disposable signer for fee estimation.
//!
//! Fee estimation signs a structurally identical transaction and measures
//! its real virtual size. The keys used for that must never be real wallet
//! keys, so each estimate gets a freshly generated signer per spend type
//! and discards it afterwards.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::ScriptBuf;

use crate::address::{address_for_pubkey, script_for_pubkey};
use crate::error::Result;
use crate::network::WalletNetwork;
use crate::utxo::SpendType;

/// A one-shot randomly keyed signer. Never reuse across builds.
#[derive(Debug, Clone)]
pub struct EstimateSigner {
    secret_key: SecretKey,
    public_key: PublicKey,
    script_pubkey: ScriptBuf,
    spend_type: SpendType,
    network: WalletNetwork,
}

impl EstimateSigner {
    pub fn from_random(spend_type: SpendType, network: WalletNetwork) -> Result<Self> {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        let script_pubkey = script_for_pubkey(&public_key, spend_type)?;
        Ok(EstimateSigner {
            secret_key,
            public_key,
            script_pubkey,
            spend_type,
            network,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn secret_key(&self) -> SecretKey {
        self.secret_key
    }

    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.script_pubkey
    }

    pub fn spend_type(&self) -> SpendType {
        self.spend_type
    }

    pub fn address(&self) -> Result<String> {
        address_for_pubkey(&self.public_key, self.spend_type, self.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_matches_spend_type() {
        let s = EstimateSigner::from_random(SpendType::P2tr, WalletNetwork::Regtest).unwrap();
        assert!(s.script_pubkey().is_p2tr());

        let s = EstimateSigner::from_random(SpendType::P2wpkh, WalletNetwork::Regtest).unwrap();
        assert!(s.script_pubkey().is_p2wpkh());

        let s = EstimateSigner::from_random(SpendType::P2shP2wpkh, WalletNetwork::Regtest).unwrap();
        assert!(s.script_pubkey().is_p2sh());

        let s = EstimateSigner::from_random(SpendType::P2pkh, WalletNetwork::Regtest).unwrap();
        assert!(s.script_pubkey().is_p2pkh());
    }

    #[test]
    fn test_each_instance_gets_fresh_keys() {
        let a = EstimateSigner::from_random(SpendType::P2tr, WalletNetwork::Mainnet).unwrap();
        let b = EstimateSigner::from_random(SpendType::P2tr, WalletNetwork::Mainnet).unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_unsized_types_rejected() {
        assert!(EstimateSigner::from_random(SpendType::Unknown, WalletNetwork::Mainnet).is_err());
    }
}
