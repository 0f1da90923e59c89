//! Validator-intent commands.
//!
//! Commands are the payload of transactions. Peer-set and stake
//! commands mutate the validator registry when their block commits;
//! data commands are opaque to consensus.

use diva_crypto::PublicKey;
use serde::{Deserialize, Serialize};

/// A single command with its position inside the containing
/// transaction (`seq` starts at 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Position within the transaction, starting at 1.
    pub seq: u32,

    /// The operation itself.
    #[serde(flatten)]
    pub op: Op,
}

/// Command operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Op {
    /// Adds a peer to the validator registry.
    #[serde(rename_all = "camelCase")]
    AddPeer {
        host: String,
        port: u16,
        public_key: PublicKey,
    },

    /// Removes a peer from the validator registry.
    #[serde(rename_all = "camelCase")]
    RemovePeer { public_key: PublicKey },

    /// Sets a peer's stake (clamped to non-negative on apply).
    #[serde(rename_all = "camelCase")]
    ModifyStake { public_key: PublicKey, stake: i64 },

    /// Opaque application data under a namespace.
    Data { ns: String, base64url: String },

    /// Synthetic load-test marker.
    TestLoad { timestamp: u64 },
}

impl Op {
    /// Returns the wire tag of this operation, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Op::AddPeer { .. } => "addPeer",
            Op::RemovePeer { .. } => "removePeer",
            Op::ModifyStake { .. } => "modifyStake",
            Op::Data { .. } => "data",
            Op::TestLoad { .. } => "testLoad",
        }
    }
}

/// Wraps bare operations with sequential `seq` numbers, starting at 1.
#[must_use]
pub fn number(ops: Vec<Op>) -> Vec<Command> {
    ops.into_iter()
        .enumerate()
        .map(|(i, op)| Command {
            seq: i as u32 + 1,
            op,
        })
        .collect()
}
