//! Asset-transfer builders.
//!
//! Thin orchestrations over [`TxAssembler`], one per asset protocol. Every
//! builder follows the same shape: validate safety preconditions, attach
//! asset inputs, attach protocol outputs, fund the fee from a pure-value
//! pool, and return the draft. Any failure aborts the build with no partial
//! transaction.

use crate::address::classify_address;
use crate::error::{Result, WalletError};
use crate::network::WalletNetwork;
use crate::runestone;
use crate::transaction::{TransactionDraft, TxAssembler};
use crate::utxo::{ensure_safe_fee_pool, RuneId, UnspentOutput};

/// Result of a transfer build: the unsigned transaction plus signing
/// metadata.
#[derive(Debug, Clone)]
pub struct TransferDraft {
    pub draft: TransactionDraft,
}

/// How much BTC a plain transfer sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAmount {
    Sats(u64),
    /// Sweep the entire pool minus fee, with no change output.
    Max,
}

/// Plain value transfer. The fee pool must be pure value: any UTXO carrying
/// an asset payload aborts before a single input is attached.
#[allow(clippy::too_many_arguments)]
pub fn build_btc_transfer(
    network: WalletNetwork,
    fee_rate: f64,
    to_address: &str,
    amount: SendAmount,
    change_address: &str,
    fee_pool: Vec<UnspentOutput>,
    rbf: bool,
) -> Result<TransferDraft> {
    ensure_safe_fee_pool(&fee_pool)?;
    log::debug!("building btc transfer to {to_address}, amount {amount:?}");

    match amount {
        SendAmount::Sats(value) => {
            let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
            asm.add_output(to_address, value)?;
            asm.add_sufficient_utxos_for_fee(fee_pool, true)?;
            Ok(TransferDraft {
                draft: asm.to_draft(),
            })
        }
        SendAmount::Max => {
            let total: u64 = fee_pool.iter().map(|u| u.value).sum();
            let fee = {
                let mut probe = TxAssembler::new(network, fee_rate, change_address, rbf)?;
                for utxo in &fee_pool {
                    probe.add_input(utxo.clone())?;
                }
                probe.add_output(to_address, 0)?;
                probe.estimate_network_fee()?
            };
            let dust = classify_address(to_address).dust_threshold;
            let value = total.checked_sub(fee).filter(|v| *v >= dust).ok_or(
                WalletError::InsufficientUtxo {
                    needed: fee.saturating_add(dust),
                    available: total,
                },
            )?;

            let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
            for utxo in fee_pool {
                asm.add_input(utxo)?;
            }
            asm.add_output(to_address, value)?;
            Ok(TransferDraft {
                draft: asm.to_draft(),
            })
        }
    }
}

/// Move one inscription-bearing UTXO to a new owner.
#[allow(clippy::too_many_arguments)]
pub fn build_inscription_transfer(
    network: WalletNetwork,
    fee_rate: f64,
    inscription_utxo: UnspentOutput,
    to_address: &str,
    output_value: u64,
    change_address: &str,
    fee_pool: Vec<UnspentOutput>,
    rbf: bool,
) -> Result<TransferDraft> {
    ensure_safe_fee_pool(&fee_pool)?;
    if inscription_utxo.inscriptions.is_empty() {
        return Err(WalletError::InvalidUtxo(format!(
            "UTXO {}:{} carries no inscription",
            inscription_utxo.txid, inscription_utxo.vout
        )));
    }
    check_inscription_offsets(&inscription_utxo, output_value)?;

    let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
    asm.add_input(inscription_utxo)?;
    asm.add_output(to_address, output_value)?;
    asm.add_sufficient_utxos_for_fee(fee_pool, false)?;
    Ok(TransferDraft {
        draft: asm.to_draft(),
    })
}

/// Move several inscription-bearing UTXOs in one transaction, each keeping
/// its own postage value. UTXOs carrying more than one inscription must be
/// split externally first.
#[allow(clippy::too_many_arguments)]
pub fn build_inscriptions_transfer(
    network: WalletNetwork,
    fee_rate: f64,
    inscription_utxos: Vec<UnspentOutput>,
    to_address: &str,
    change_address: &str,
    fee_pool: Vec<UnspentOutput>,
    rbf: bool,
) -> Result<TransferDraft> {
    ensure_safe_fee_pool(&fee_pool)?;
    for utxo in &inscription_utxos {
        if utxo.inscriptions.len() > 1 {
            return Err(WalletError::UnsafeUtxoSet(format!(
                "UTXO {}:{} carries {} inscriptions; split before batch transfer",
                utxo.txid,
                utxo.vout,
                utxo.inscriptions.len()
            )));
        }
        if utxo.inscriptions.is_empty() {
            return Err(WalletError::InvalidUtxo(format!(
                "UTXO {}:{} carries no inscription",
                utxo.txid, utxo.vout
            )));
        }
        check_inscription_offsets(utxo, utxo.value)?;
    }

    let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
    for utxo in inscription_utxos {
        let value = utxo.value;
        asm.add_input(utxo)?;
        asm.add_output(to_address, value)?;
    }
    asm.add_sufficient_utxos_for_fee(fee_pool, false)?;
    Ok(TransferDraft {
        draft: asm.to_draft(),
    })
}

/// Transfer `send_amount` of a fungible protocol token. Token inputs are
/// consumed whole; a token-change output is emitted when a remainder stays
/// with the sender.
#[allow(clippy::too_many_arguments)]
pub fn build_token_transfer(
    network: WalletNetwork,
    fee_rate: f64,
    token_utxos: Vec<UnspentOutput>,
    ticker: &str,
    send_amount: u128,
    to_address: &str,
    token_change_address: &str,
    change_address: &str,
    fee_pool: Vec<UnspentOutput>,
    rbf: bool,
) -> Result<TransferDraft> {
    ensure_safe_fee_pool(&fee_pool)?;
    let total: u128 = token_utxos
        .iter()
        .flat_map(|u| &u.tokens)
        .filter(|t| t.ticker == ticker)
        .map(|t| t.amount)
        .sum();
    if total < send_amount {
        return Err(WalletError::InsufficientAssetUtxo {
            needed: send_amount,
            available: total,
        });
    }
    let remainder = total - send_amount;
    log::debug!("token transfer {send_amount} {ticker}, remainder {remainder}");

    let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
    for utxo in token_utxos {
        asm.add_input(utxo)?;
    }
    asm.add_output(to_address, classify_address(to_address).dust_threshold)?;
    if remainder > 0 {
        asm.add_output(
            token_change_address,
            classify_address(token_change_address).dust_threshold,
        )?;
    }
    asm.add_sufficient_utxos_for_fee(fee_pool, false)?;
    Ok(TransferDraft {
        draft: asm.to_draft(),
    })
}

/// Transfer an amount of one rune. Output layout is fixed by the edict
/// encoding: the OP_RETURN payload is output 0, then (with rune change)
/// the change postage at output 1 and the receiver postage at output 2,
/// or just the receiver postage at output 1.
#[allow(clippy::too_many_arguments)]
pub fn build_rune_transfer(
    network: WalletNetwork,
    fee_rate: f64,
    rune_id: RuneId,
    send_amount: u128,
    rune_utxos: Vec<UnspentOutput>,
    to_address: &str,
    rune_change_address: &str,
    change_address: &str,
    fee_pool: Vec<UnspentOutput>,
    rbf: bool,
) -> Result<TransferDraft> {
    ensure_safe_fee_pool(&fee_pool)?;
    let total: u128 = rune_utxos
        .iter()
        .flat_map(|u| &u.runes)
        .filter(|r| r.rune_id == rune_id)
        .map(|r| r.amount)
        .sum();
    if total < send_amount {
        return Err(WalletError::InsufficientAssetUtxo {
            needed: send_amount,
            available: total,
        });
    }
    let change_amount = total - send_amount;
    let payload = runestone::encode_transfer(rune_id, send_amount, change_amount)?;

    let mut asm = TxAssembler::new(network, fee_rate, change_address, rbf)?;
    for utxo in rune_utxos {
        asm.add_input(utxo)?;
    }
    asm.add_data_output(payload);
    if change_amount > 0 {
        asm.add_output(
            rune_change_address,
            classify_address(rune_change_address).dust_threshold,
        )?;
    }
    asm.add_output(to_address, classify_address(to_address).dust_threshold)?;
    asm.add_sufficient_utxos_for_fee(fee_pool, false)?;
    Ok(TransferDraft {
        draft: asm.to_draft(),
    })
}

fn check_inscription_offsets(utxo: &UnspentOutput, output_value: u64) -> Result<()> {
    for inscription in &utxo.inscriptions {
        if output_value < inscription.offset {
            return Err(WalletError::AssetMaybeLost(format!(
                "output of {output_value} sats cannot carry inscription {} at offset {}",
                inscription.inscription_id, inscription.offset
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{address_for_pubkey, script_for_pubkey};
    use crate::utxo::{InscriptionPayload, RunePayload, SpendType, TokenPayload};
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::Txid;

    const NET: WalletNetwork = WalletNetwork::Regtest;

    fn utxo(value: u64) -> UnspentOutput {
        let secp = Secp256k1::new();
        let (_sk, pk) = secp.generate_keypair(&mut rand::thread_rng());
        UnspentOutput {
            txid: Txid::all_zeros(),
            vout: 0,
            value,
            spend_type: SpendType::P2tr,
            pubkey: pk,
            script_pubkey: script_for_pubkey(&pk, SpendType::P2tr).unwrap(),
            raw_parent_tx: None,
            inscriptions: Vec::new(),
            tokens: Vec::new(),
            runes: Vec::new(),
        }
    }

    fn addr() -> String {
        let secp = Secp256k1::new();
        let (_sk, pk) = secp.generate_keypair(&mut rand::thread_rng());
        address_for_pubkey(&pk, SpendType::P2tr, NET).unwrap()
    }

    #[test]
    fn test_btc_transfer_rejects_asset_bearing_pool() {
        let mut tainted = utxo(50_000);
        tainted.inscriptions.push(InscriptionPayload {
            inscription_id: "abci0".to_string(),
            offset: 0,
        });
        let err = build_btc_transfer(
            NET,
            5.0,
            &addr(),
            SendAmount::Sats(10_000),
            &addr(),
            vec![tainted],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::UnsafeUtxoSet(_)));
    }

    #[test]
    fn test_send_max_sweeps_without_change() {
        let pool = vec![utxo(40_000), utxo(60_000)];
        let transfer =
            build_btc_transfer(NET, 2.0, &addr(), SendAmount::Max, &addr(), pool, true).unwrap();
        let tx = &transfer.draft.unsigned_tx;
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output.len(), 1);
        let sent = tx.output[0].value.to_sat();
        assert!(sent < 100_000);
        assert!(sent > 99_000);
    }

    #[test]
    fn test_inscription_offset_guard() {
        let mut inscribed = utxo(10_000);
        inscribed.inscriptions.push(InscriptionPayload {
            inscription_id: "abci0".to_string(),
            offset: 800,
        });
        let err = build_inscription_transfer(
            NET,
            2.0,
            inscribed,
            &addr(),
            546,
            &addr(),
            vec![utxo(20_000)],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::AssetMaybeLost(_)));
    }

    #[test]
    fn test_multi_inscription_utxo_rejected() {
        let mut crowded = utxo(10_000);
        for i in 0..2 {
            crowded.inscriptions.push(InscriptionPayload {
                inscription_id: format!("abci{i}"),
                offset: 0,
            });
        }
        let err = build_inscriptions_transfer(
            NET,
            2.0,
            vec![crowded],
            &addr(),
            &addr(),
            vec![utxo(20_000)],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::UnsafeUtxoSet(_)));
    }

    #[test]
    fn test_token_transfer_insufficient_balance() {
        let mut holder = utxo(546);
        holder.tokens.push(TokenPayload {
            ticker: "ordi".to_string(),
            amount: 100,
        });
        let err = build_token_transfer(
            NET,
            2.0,
            vec![holder],
            "ordi",
            250,
            &addr(),
            &addr(),
            &addr(),
            vec![utxo(20_000)],
            true,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientAssetUtxo {
                needed: 250,
                available: 100
            }
        ));
    }

    #[test]
    fn test_token_transfer_emits_change_output() {
        let mut holder = utxo(546);
        holder.tokens.push(TokenPayload {
            ticker: "ordi".to_string(),
            amount: 100,
        });
        let transfer = build_token_transfer(
            NET,
            2.0,
            vec![holder],
            "ordi",
            40,
            &addr(),
            &addr(),
            &addr(),
            vec![utxo(50_000)],
            true,
        )
        .unwrap();
        // receiver postage + token change postage, then btc change
        assert!(transfer.draft.unsigned_tx.output.len() >= 2);
    }

    #[test]
    fn test_rune_transfer_output_layout_with_change() {
        let id = RuneId {
            block: 840_000,
            tx: 7,
        };
        let mut holder = utxo(546);
        holder.runes.push(RunePayload {
            rune_id: id,
            amount: 1_000,
        });
        let transfer = build_rune_transfer(
            NET,
            2.0,
            id,
            600,
            vec![holder],
            &addr(),
            &addr(),
            &addr(),
            vec![utxo(50_000)],
            true,
        )
        .unwrap();
        let tx = &transfer.draft.unsigned_tx;
        assert!(tx.output[0].script_pubkey.is_op_return());
        let edicts = runestone::decode_transfer(&tx.output[0].script_pubkey).unwrap();
        assert_eq!(edicts.len(), 2);
        assert_eq!(edicts[0].amount, 400);
        assert_eq!(edicts[0].output, 1);
        assert_eq!(edicts[1].amount, 600);
        assert_eq!(edicts[1].output, 2);
        // outputs 1 and 2 are the value-bearing postage outputs
        assert!(tx.output[1].value.to_sat() > 0);
        assert!(tx.output[2].value.to_sat() > 0);
    }

    #[test]
    fn test_rune_transfer_without_change_single_edict() {
        let id = RuneId {
            block: 840_000,
            tx: 7,
        };
        let mut holder = utxo(546);
        holder.runes.push(RunePayload {
            rune_id: id,
            amount: 1_000,
        });
        let transfer = build_rune_transfer(
            NET,
            2.0,
            id,
            1_000,
            vec![holder],
            &addr(),
            &addr(),
            &addr(),
            vec![utxo(50_000)],
            true,
        )
        .unwrap();
        let edicts =
            runestone::decode_transfer(&transfer.draft.unsigned_tx.output[0].script_pubkey)
                .unwrap();
        assert_eq!(edicts.len(), 1);
        assert_eq!(edicts[0].output, 1);
    }

    #[test]
    fn test_rune_insufficient_balance() {
        let id = RuneId {
            block: 840_000,
            tx: 7,
        };
        let holder = utxo(546);
        let err = build_rune_transfer(
            NET,
            2.0,
            id,
            1,
            vec![holder],
            &addr(),
            &addr(),
            &addr(),
            vec![utxo(50_000)],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientAssetUtxo { .. }));
    }
}
