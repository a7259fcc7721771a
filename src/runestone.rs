//! Rune transfer payload encoding.
//!
//! A rune transfer is declared in an `OP_RETURN OP_13 <payload>` output.
//! The payload is a body tag followed by delta-encoded edicts, each a
//! `(block, tx, amount, output)` quadruple of base-128 varints. Edict output
//! indices refer to the positions of the value-bearing outputs that follow
//! the OP_RETURN in the same transaction.

use bitcoin::opcodes::all::{OP_PUSHNUM_13, OP_RETURN};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};

use crate::error::{Result, WalletError};
use crate::utxo::RuneId;

/// Body tag: everything after it is edict quadruples.
const TAG_BODY: u128 = 0;

/// One rune movement instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edict {
    pub id: RuneId,
    pub amount: u128,
    pub output: u32,
}

pub mod varint {
    //! Base-128 varints: 7 payload bits per byte, low groups first, high
    //! bit set on every byte except the last.

    use crate::error::{Result, WalletError};

    /// Longest encoding of a u128: ceil(128 / 7) bytes.
    pub const MAX_LEN: usize = 19;

    pub fn encode(mut value: u128, buf: &mut Vec<u8>) {
        while value >> 7 != 0 {
            buf.push(value as u8 | 0x80);
            value >>= 7;
        }
        buf.push(value as u8);
    }

    /// Decodes one varint, returning the value and the bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(u128, usize)> {
        let mut value: u128 = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            if i >= MAX_LEN {
                return Err(WalletError::InvalidPayload(
                    "varint exceeds 128 bits".to_string(),
                ));
            }
            value |= u128::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok((value, i + 1));
            }
        }
        Err(WalletError::InvalidPayload(
            "unterminated varint".to_string(),
        ))
    }
}

/// Encode a single-rune transfer payload.
///
/// With rune change, the payload carries the change edict (output 1) before
/// the send edict (output 2); without change, a lone send edict to output 1.
/// The caller must lay out its value outputs to match.
pub fn encode_transfer(rune_id: RuneId, amount: u128, change_amount: u128) -> Result<ScriptBuf> {
    let edicts = if change_amount > 0 {
        vec![
            Edict {
                id: rune_id,
                amount: change_amount,
                output: 1,
            },
            Edict {
                id: rune_id,
                amount,
                output: 2,
            },
        ]
    } else {
        vec![Edict {
            id: rune_id,
            amount,
            output: 1,
        }]
    };
    encode_edicts(&edicts)
}

/// Encode an edict list into the OP_RETURN script. Edicts must already be
/// in protocol order; ids are delta-encoded against the previous edict.
pub fn encode_edicts(edicts: &[Edict]) -> Result<ScriptBuf> {
    let mut payload = Vec::new();
    varint::encode(TAG_BODY, &mut payload);

    let mut previous = RuneId { block: 0, tx: 0 };
    for edict in edicts {
        let block_delta = edict.id.block.checked_sub(previous.block).ok_or_else(|| {
            WalletError::InvalidPayload("edicts not in ascending rune-id order".to_string())
        })?;
        let tx_field = if block_delta == 0 {
            edict.id.tx.checked_sub(previous.tx).ok_or_else(|| {
                WalletError::InvalidPayload("edicts not in ascending rune-id order".to_string())
            })?
        } else {
            edict.id.tx
        };
        varint::encode(u128::from(block_delta), &mut payload);
        varint::encode(u128::from(tx_field), &mut payload);
        varint::encode(edict.amount, &mut payload);
        varint::encode(u128::from(edict.output), &mut payload);
        previous = edict.id;
    }

    let push = PushBytesBuf::try_from(payload)
        .map_err(|_| WalletError::InvalidPayload("edict payload exceeds push limit".to_string()))?;
    Ok(Builder::new()
        .push_opcode(OP_RETURN)
        .push_opcode(OP_PUSHNUM_13)
        .push_slice(push)
        .into_script())
}

/// Decode the edict list from a rune OP_RETURN script.
pub fn decode_transfer(script: &Script) -> Result<Vec<Edict>> {
    let payload = extract_payload(script)?;

    let (tag, mut cursor) = varint::decode(&payload)?;
    if tag != TAG_BODY {
        return Err(WalletError::InvalidPayload(format!(
            "expected body tag, found tag {tag}"
        )));
    }

    let mut edicts = Vec::new();
    let mut previous = RuneId { block: 0, tx: 0 };
    while cursor < payload.len() {
        let mut field = |cursor: &mut usize| -> Result<u128> {
            let (value, len) = varint::decode(&payload[*cursor..])?;
            *cursor += len;
            Ok(value)
        };
        let block_delta = field(&mut cursor)?;
        let tx_field = field(&mut cursor)?;
        let amount = field(&mut cursor)?;
        let output = field(&mut cursor)?;

        let id = if block_delta == 0 {
            RuneId {
                block: previous.block,
                tx: previous
                    .tx
                    .checked_add(narrow_u32(tx_field)?)
                    .ok_or_else(|| {
                        WalletError::InvalidPayload("tx index overflow".to_string())
                    })?,
            }
        } else {
            RuneId {
                block: previous
                    .block
                    .checked_add(narrow_u64(block_delta)?)
                    .ok_or_else(|| {
                        WalletError::InvalidPayload("block height overflow".to_string())
                    })?,
                tx: narrow_u32(tx_field)?,
            }
        };
        edicts.push(Edict {
            id,
            amount,
            output: narrow_u32(output)?,
        });
        previous = id;
    }
    Ok(edicts)
}

fn extract_payload(script: &Script) -> Result<Vec<u8>> {
    let mut instructions = script.instructions();
    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => {}
        _ => {
            return Err(WalletError::InvalidPayload(
                "not an OP_RETURN script".to_string(),
            ))
        }
    }
    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_PUSHNUM_13 => {}
        _ => {
            return Err(WalletError::InvalidPayload(
                "missing rune protocol tag".to_string(),
            ))
        }
    }

    let mut payload = Vec::new();
    for instruction in instructions {
        match instruction {
            Ok(Instruction::PushBytes(push)) => payload.extend_from_slice(push.as_bytes()),
            _ => {
                return Err(WalletError::InvalidPayload(
                    "non-push data in rune payload".to_string(),
                ))
            }
        }
    }
    Ok(payload)
}

fn narrow_u32(value: u128) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| WalletError::InvalidPayload(format!("field {value} exceeds u32")))
}

fn narrow_u64(value: u128) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| WalletError::InvalidPayload(format!("field {value} exceeds u64")))
}
