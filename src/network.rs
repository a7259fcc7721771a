//! Network parameter management.
//!
//! Maps the abstract network selector onto the address-prefix constants the
//! codec and the transaction assembler need. All configuration is passed as
//! explicit call parameters; there is no process-global network state.

use core::str::FromStr;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// The networks this engine builds transactions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletNetwork {
    Mainnet,
    Testnet,
    Regtest,
}

/// Address encoding constants for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPrefixes {
    /// Base58 version byte for P2PKH addresses.
    pub p2pkh: u8,
    /// Base58 version byte for P2SH addresses.
    pub p2sh: u8,
    /// Bech32 human-readable part for segwit addresses.
    pub bech32_hrp: &'static str,
}

impl WalletNetwork {
    pub fn prefixes(&self) -> AddressPrefixes {
        match self {
            WalletNetwork::Mainnet => AddressPrefixes {
                p2pkh: 0x00,
                p2sh: 0x05,
                bech32_hrp: "bc",
            },
            WalletNetwork::Testnet => AddressPrefixes {
                p2pkh: 0x6f,
                p2sh: 0xc4,
                bech32_hrp: "tb",
            },
            WalletNetwork::Regtest => AddressPrefixes {
                p2pkh: 0x6f,
                p2sh: 0xc4,
                bech32_hrp: "bcrt",
            },
        }
    }

    /// The corresponding `bitcoin` crate network.
    pub fn to_bitcoin(&self) -> Network {
        match self {
            WalletNetwork::Mainnet => Network::Bitcoin,
            WalletNetwork::Testnet => Network::Testnet,
            WalletNetwork::Regtest => Network::Regtest,
        }
    }
}

impl FromStr for WalletNetwork {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mainnet" => Ok(WalletNetwork::Mainnet),
            "testnet" => Ok(WalletNetwork::Testnet),
            "regtest" => Ok(WalletNetwork::Regtest),
            _ => Err(WalletError::InvalidAddress(format!("invalid network: {s}"))),
        }
    }
}

impl core::fmt::Display for WalletNetwork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            WalletNetwork::Mainnet => "mainnet",
            WalletNetwork::Testnet => "testnet",
            WalletNetwork::Regtest => "regtest",
        };
        write!(f, "{s}")
    }
}
