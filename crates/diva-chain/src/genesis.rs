//! Genesis block loading and validation.
//!
//! The genesis is a single JSON document shaped like any other block,
//! at height 0 with an empty previous hash and zero-filled origin and
//! signature. Its one synthetic transaction enumerates the initial
//! `addPeer` / `modifyStake` set.

use crate::block::Block;
use crate::command::{Command, Op};
use crate::error::{ChainError, Result};
use crate::registry::ValidatorRegistry;
use crate::transaction::Transaction;
use diva_crypto::{Keypair, PublicKey, Signature};
use std::path::Path;

/// Block format version written by this implementation.
pub const BLOCK_VERSION: u32 = 1;

/// The zero-filled origin used by genesis documents (all-zero key
/// bytes, `A`-run in base64url).
#[must_use]
pub fn zero_origin() -> PublicKey {
    PublicKey::from_bytes(&[0u8; 32]).expect("all-zero bytes decode to a curve point")
}

/// The zero-filled signature used by genesis documents.
#[must_use]
pub fn zero_sig() -> Signature {
    Signature::from_bytes([0u8; 64])
}

/// Loads and validates a genesis block from a JSON file.
pub fn load(path: impl AsRef<Path>) -> Result<Block> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ChainError::InvalidGenesis(format!("failed to read file: {e}")))?;
    from_json(&content)
}

/// Parses and validates a genesis block from JSON.
pub fn from_json(content: &str) -> Result<Block> {
    let block: Block = serde_json::from_str(content)
        .map_err(|e| ChainError::InvalidGenesis(e.to_string()))?;
    validate(&block)?;
    Ok(block)
}

/// Validates the genesis invariants: height 0, empty previous hash,
/// intact hash, and a command set that yields a non-empty staked
/// validator registry.
pub fn validate(block: &Block) -> Result<()> {
    block.verify_structure(None)?;

    if block.tx.is_empty() {
        return Err(ChainError::InvalidGenesis("no transactions".into()));
    }

    let mut registry = ValidatorRegistry::new();
    registry.apply_block(block)?;

    if registry.is_empty() {
        return Err(ChainError::InvalidGenesis("no validators".into()));
    }
    if registry.total() == 0 {
        return Err(ChainError::InvalidGenesis("no stake".into()));
    }

    Ok(())
}

/// Generates a devnet genesis with `n` seeded validators of equal
/// stake, returning the block and the validators' keypairs.
///
/// Intended for tests and local multi-node fixtures.
#[must_use]
pub fn generate_devnet(n: usize) -> (Block, Vec<Keypair>) {
    generate_devnet_with_stake(n, 10)
}

/// Like [`generate_devnet`] with an explicit per-validator stake.
#[must_use]
pub fn generate_devnet_with_stake(n: usize, stake: i64) -> (Block, Vec<Keypair>) {
    let keys: Vec<Keypair> = (0..n)
        .map(|i| {
            Keypair::from_secret_bytes(&[i as u8 + 1; 32])
                .expect("seeded secret key is 32 bytes")
        })
        .collect();

    let mut ops = Vec::with_capacity(n * 2);
    for (i, key) in keys.iter().enumerate() {
        ops.push(Op::AddPeer {
            host: "127.0.0.1".into(),
            port: 17_468 + i as u16,
            public_key: key.public_key(),
        });
        ops.push(Op::ModifyStake {
            public_key: key.public_key(),
            stake,
        });
    }

    let commands: Vec<Command> = crate::command::number(ops);
    let tx = Transaction {
        ident: "genesis".into(),
        origin: zero_origin(),
        timestamp: 0,
        commands,
        sig: zero_sig(),
    };

    let mut block = Block {
        version: BLOCK_VERSION,
        height: 0,
        timestamp: 0,
        previous_hash: String::new(),
        hash: String::new(),
        tx: vec![tx],
        origin: zero_origin(),
        sig: zero_sig(),
        votes: Vec::new(),
    };
    block.hash = block.compute_hash();

    (block, keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devnet_genesis_validates() {
        let (genesis, keys) = generate_devnet(5);
        assert_eq!(keys.len(), 5);
        assert!(validate(&genesis).is_ok());
    }

    #[test]
    fn devnet_genesis_registry() {
        let (genesis, keys) = generate_devnet(5);
        let mut registry = ValidatorRegistry::new();
        registry.apply_block(&genesis).unwrap();

        assert_eq!(registry.len(), 5);
        assert_eq!(registry.total(), 50);
        for key in &keys {
            assert_eq!(registry.stake_of(&key.public_key()), 10);
        }
    }

    #[test]
    fn genesis_json_roundtrip() {
        let (genesis, _) = generate_devnet(4);
        let json = serde_json::to_string(&genesis).unwrap();
        let parsed = from_json(&json).unwrap();
        assert_eq!(parsed, genesis);
    }

    #[test]
    fn tampered_genesis_rejected() {
        let (genesis, _) = generate_devnet(4);
        let mut json = serde_json::to_value(&genesis).unwrap();
        json["timestamp"] = 1.into();
        assert!(from_json(&json.to_string()).is_err());
    }

    #[test]
    fn unstaked_genesis_rejected() {
        let (mut genesis, _) = generate_devnet(4);
        genesis.tx[0]
            .commands
            .retain(|c| !matches!(c.op, Op::ModifyStake { .. }));
        genesis.hash = genesis.compute_hash();
        assert!(matches!(
            validate(&genesis),
            Err(ChainError::InvalidGenesis(_))
        ));
    }
}
