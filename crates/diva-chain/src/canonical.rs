//! Canonical encoding for hash and signature inputs.
//!
//! Every byte string that is hashed or signed is produced here, by a
//! dedicated writer: keys in fixed order, integers in plain decimal,
//! strings with minimal JSON escapes, no whitespace. General-purpose
//! JSON serialization is never used for these payloads, so re-encoding
//! divergence between nodes is impossible by construction.

use crate::block::Block;
use crate::command::{Command, Op};
use crate::message::Payload;
use crate::transaction::Transaction;
use diva_crypto::PublicKey;
use std::fmt::Write;

/// Canonical form of a command list.
#[must_use]
pub fn commands(cmds: &[Command]) -> String {
    let mut out = String::new();
    write_commands(&mut out, cmds);
    out
}

/// The byte string a transaction signature commits to:
/// `ident ∥ timestamp ∥ canonical(commands)`.
#[must_use]
pub fn tx_signing_payload(ident: &str, timestamp: u64, cmds: &[Command]) -> String {
    let mut out = String::new();
    out.push_str(ident);
    let _ = write!(out, "{timestamp}");
    write_commands(&mut out, cmds);
    out
}

/// Canonical form of a full transaction (including its signature).
#[must_use]
pub fn transaction(tx: &Transaction) -> String {
    let mut out = String::new();
    write_transaction(&mut out, tx);
    out
}

/// Canonical form of a transaction list, in given order.
#[must_use]
pub fn transactions(txs: &[Transaction]) -> String {
    let mut out = String::new();
    write_transactions(&mut out, txs);
    out
}

/// The byte string a block hash commits to:
/// `previousHash ∥ version ∥ timestamp ∥ height ∥ canonical(tx)`.
#[must_use]
pub fn block_hash_payload(
    previous_hash: &str,
    version: u32,
    timestamp: u64,
    height: u64,
    txs: &[Transaction],
) -> String {
    let mut out = String::new();
    out.push_str(previous_hash);
    let _ = write!(out, "{version}{timestamp}{height}");
    write_transactions(&mut out, txs);
    out
}

/// Canonical form of a full block (including hash, signature and votes).
#[must_use]
pub fn block(b: &Block) -> String {
    let mut out = String::new();
    write_block(&mut out, b);
    out
}

/// Canonical form of a message payload.
#[must_use]
pub fn payload(p: &Payload) -> String {
    let mut out = String::new();
    write_payload(&mut out, p);
    out
}

/// The byte string an envelope signature commits to:
/// `ident ∥ seq ∥ origin ∥ dest ∥ canonical(data)`.
///
/// The relay path is deliberately excluded; it mutates in flight.
#[must_use]
pub fn envelope_signing_payload(
    ident: &str,
    seq: u64,
    origin: &PublicKey,
    dest: &str,
    data: &Payload,
) -> String {
    let mut out = String::new();
    out.push_str(ident);
    let _ = write!(out, "{seq}");
    out.push_str(&origin.to_b64());
    out.push_str(dest);
    write_payload(&mut out, data);
    out
}

fn write_commands(out: &mut String, cmds: &[Command]) {
    out.push('[');
    for (i, cmd) in cmds.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_command(out, cmd);
    }
    out.push(']');
}

fn write_command(out: &mut String, cmd: &Command) {
    let _ = write!(out, "{{\"seq\":{}", cmd.seq);
    match &cmd.op {
        Op::AddPeer {
            host,
            port,
            public_key,
        } => {
            out.push_str(",\"command\":\"addPeer\",\"host\":");
            write_str(out, host);
            let _ = write!(out, ",\"port\":{port},\"publicKey\":");
            write_str(out, &public_key.to_b64());
        }
        Op::RemovePeer { public_key } => {
            out.push_str(",\"command\":\"removePeer\",\"publicKey\":");
            write_str(out, &public_key.to_b64());
        }
        Op::ModifyStake { public_key, stake } => {
            out.push_str(",\"command\":\"modifyStake\",\"publicKey\":");
            write_str(out, &public_key.to_b64());
            let _ = write!(out, ",\"stake\":{stake}");
        }
        Op::Data { ns, base64url } => {
            out.push_str(",\"command\":\"data\",\"ns\":");
            write_str(out, ns);
            out.push_str(",\"base64url\":");
            write_str(out, base64url);
        }
        Op::TestLoad { timestamp } => {
            let _ = write!(out, ",\"command\":\"testLoad\",\"timestamp\":{timestamp}");
        }
    }
    out.push('}');
}

fn write_transaction(out: &mut String, tx: &Transaction) {
    out.push_str("{\"ident\":");
    write_str(out, &tx.ident);
    out.push_str(",\"origin\":");
    write_str(out, &tx.origin.to_b64());
    let _ = write!(out, ",\"timestamp\":{}", tx.timestamp);
    out.push_str(",\"commands\":");
    write_commands(out, &tx.commands);
    out.push_str(",\"sig\":");
    write_str(out, &tx.sig.to_b64());
    out.push('}');
}

fn write_transactions(out: &mut String, txs: &[Transaction]) {
    out.push('[');
    for (i, tx) in txs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_transaction(out, tx);
    }
    out.push(']');
}

fn write_block(out: &mut String, b: &Block) {
    let _ = write!(
        out,
        "{{\"version\":{},\"height\":{},\"timestamp\":{}",
        b.version, b.height, b.timestamp
    );
    out.push_str(",\"previousHash\":");
    write_str(out, &b.previous_hash);
    out.push_str(",\"hash\":");
    write_str(out, &b.hash);
    out.push_str(",\"tx\":");
    write_transactions(out, &b.tx);
    out.push_str(",\"origin\":");
    write_str(out, &b.origin.to_b64());
    out.push_str(",\"sig\":");
    write_str(out, &b.sig.to_b64());
    out.push_str(",\"votes\":[");
    for (i, vote) in b.votes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("{\"origin\":");
        write_str(out, &vote.origin.to_b64());
        out.push_str(",\"sig\":");
        write_str(out, &vote.sig.to_b64());
        out.push('}');
    }
    out.push_str("]}");
}

fn write_payload(out: &mut String, p: &Payload) {
    match p {
        Payload::AddTx { transaction } => {
            out.push_str("{\"type\":\"addTx\",\"transaction\":");
            write_transaction(out, transaction);
            out.push('}');
        }
        Payload::Propose { block } => {
            out.push_str("{\"type\":\"propose\",\"block\":");
            write_block(out, block);
            out.push('}');
        }
        Payload::Sign {
            block_hash,
            signature,
        } => {
            out.push_str("{\"type\":\"sign\",\"blockHash\":");
            write_str(out, block_hash);
            out.push_str(",\"signature\":");
            write_str(out, &signature.to_b64());
            out.push('}');
        }
        Payload::Confirm { block } => {
            out.push_str("{\"type\":\"confirm\",\"block\":");
            write_block(out, block);
            out.push('}');
        }
        Payload::Sync {
            from_height,
            to_height,
        } => {
            let _ = write!(
                out,
                "{{\"type\":\"sync\",\"fromHeight\":{from_height},\"toHeight\":{to_height}}}"
            );
        }
    }
}

/// Writes a JSON string literal with the minimum required escapes.
fn write_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
