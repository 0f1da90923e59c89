//! Blocks and their invariants.
//!
//! A block commits to its predecessor by hash, carries at most one
//! transaction per origin (sorted ascending by the origin's base64url
//! form), is signed by its proposer over the block hash, and becomes
//! final only with a stake-weighted quorum of votes over that hash.

use crate::canonical;
use crate::error::{ChainError, Result};
use crate::registry::ValidatorRegistry;
use crate::transaction::Transaction;
use crate::Signer;
use diva_crypto::{Digest, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// A validator's signature over a block hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// The voting validator.
    pub origin: PublicKey,

    /// Detached signature over the block hash.
    pub sig: Signature,
}

/// A block in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block format version.
    pub version: u32,

    /// Height, 0 for genesis.
    pub height: u64,

    /// Creation time in unix milliseconds.
    pub timestamp: u64,

    /// Hash of the predecessor; empty for genesis.
    pub previous_hash: String,

    /// SHA-256 over `previousHash ∥ version ∥ timestamp ∥ height ∥
    /// canonical(tx)`, base64url-encoded.
    pub hash: String,

    /// Transactions, sorted ascending by origin, at most one per origin.
    pub tx: Vec<Transaction>,

    /// The proposer.
    pub origin: PublicKey,

    /// Proposer signature over `hash`.
    pub sig: Signature,

    /// Quorum votes over `hash`.
    pub votes: Vec<Vote>,
}

impl Block {
    /// Assembles and signs a candidate block on top of a predecessor.
    ///
    /// Transactions are sorted by origin; duplicate origins are
    /// rejected (the pool is expected to have deduplicated).
    pub fn build<S: Signer>(
        signer: &S,
        version: u32,
        previous: &Block,
        timestamp: u64,
        mut tx: Vec<Transaction>,
    ) -> Result<Self> {
        tx.sort_by(|a, b| a.origin.cmp(&b.origin));
        for pair in tx.windows(2) {
            if pair[0].origin == pair[1].origin {
                return Err(ChainError::InvalidBlock(format!(
                    "duplicate origin {}",
                    pair[0].origin.short_id()
                )));
            }
        }

        let height = previous.height + 1;
        let hash = hash_of(&previous.hash, version, timestamp, height, &tx);
        let sig = signer.sign(hash.as_bytes());

        Ok(Self {
            version,
            height,
            timestamp,
            previous_hash: previous.hash.clone(),
            hash,
            tx,
            origin: signer.public_key(),
            sig,
            votes: Vec::new(),
        })
    }

    /// Recomputes this block's hash from its fields.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        hash_of(
            &self.previous_hash,
            self.version,
            self.timestamp,
            self.height,
            &self.tx,
        )
    }

    /// True for the height-0 genesis block.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Verifies the structural invariants against the predecessor.
    ///
    /// Checks linkage, transaction ordering (strictly ascending origins,
    /// hence at most one per origin), hash integrity, the proposer
    /// signature, and every transaction signature. Genesis is exempt
    /// from signature checks.
    pub fn verify_structure(&self, previous: Option<&Block>) -> Result<()> {
        match previous {
            None => {
                if !self.is_genesis() || !self.previous_hash.is_empty() {
                    return Err(ChainError::InvalidBlock("not a genesis block".into()));
                }
            }
            Some(prev) => {
                if self.height != prev.height + 1 {
                    return Err(ChainError::ChainGap {
                        expected: prev.height + 1,
                        got: self.height,
                    });
                }
                if self.previous_hash != prev.hash {
                    return Err(ChainError::InvalidBlock("previous hash mismatch".into()));
                }
            }
        }

        for pair in self.tx.windows(2) {
            if pair[0].origin >= pair[1].origin {
                return Err(ChainError::InvalidBlock(
                    "transactions not strictly ordered by origin".into(),
                ));
            }
        }

        if self.hash != self.compute_hash() {
            return Err(ChainError::InvalidBlock("hash mismatch".into()));
        }

        if self.is_genesis() {
            return Ok(());
        }

        self.origin
            .verify(self.hash.as_bytes(), &self.sig)
            .map_err(|_| ChainError::InvalidBlock("proposer signature".into()))?;

        for tx in &self.tx {
            tx.verify()?;
        }

        Ok(())
    }

    /// Verifies the vote set against the registry in force at the
    /// predecessor: distinct signers, registry membership, valid
    /// signatures over the hash, and stake sum at or above the quorum.
    pub fn verify_votes(&self, registry: &ValidatorRegistry) -> Result<()> {
        if self.is_genesis() {
            return Ok(());
        }

        let mut stake = 0u64;
        let mut seen = std::collections::BTreeSet::new();

        for vote in &self.votes {
            if !seen.insert(vote.origin) {
                return Err(ChainError::InvalidVote(format!(
                    "duplicate signer {}",
                    vote.origin.short_id()
                )));
            }
            if !registry.contains(&vote.origin) {
                return Err(ChainError::InvalidVote(format!(
                    "signer {} not in registry",
                    vote.origin.short_id()
                )));
            }
            vote.origin
                .verify(self.hash.as_bytes(), &vote.sig)
                .map_err(|_| {
                    ChainError::InvalidVote(format!("signature of {}", vote.origin.short_id()))
                })?;
            stake += registry.stake_of(&vote.origin);
        }

        let required = registry.quorum();
        if stake < required {
            return Err(ChainError::QuorumNotReached {
                got: stake,
                required,
            });
        }

        Ok(())
    }
}

fn hash_of(
    previous_hash: &str,
    version: u32,
    timestamp: u64,
    height: u64,
    tx: &[Transaction],
) -> String {
    let payload = canonical::block_hash_payload(previous_hash, version, timestamp, height, tx);
    Digest::compute(payload.as_bytes()).to_b64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{number, Op};
    use crate::genesis;
    use crate::test_support::keypair;

    fn tx_from(seed: u8) -> Transaction {
        let kp = keypair(seed);
        Transaction::build(
            &kp,
            "t1".into(),
            1_700_000_000_000,
            number(vec![Op::TestLoad { timestamp: 1 }]),
        )
        .unwrap()
    }

    #[test]
    fn build_sorts_and_links() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let proposer = &keys[0];

        let block = Block::build(
            proposer,
            1,
            &genesis,
            1_700_000_001_000,
            vec![tx_from(9), tx_from(8)],
        )
        .unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(block.previous_hash, genesis.hash);
        assert!(block.tx[0].origin < block.tx[1].origin);
        assert!(block.verify_structure(Some(&genesis)).is_ok());
    }

    #[test]
    fn build_rejects_duplicate_origin() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let err = Block::build(
            &keys[0],
            1,
            &genesis,
            1_700_000_001_000,
            vec![tx_from(9), tx_from(9)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn hash_is_deterministic() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let block = Block::build(&keys[0], 1, &genesis, 5, vec![tx_from(7)]).unwrap();
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn tampering_breaks_structure() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let mut block = Block::build(&keys[0], 1, &genesis, 5, vec![tx_from(7)]).unwrap();
        block.timestamp += 1;
        assert!(block.verify_structure(Some(&genesis)).is_err());
    }

    #[test]
    fn gap_is_detected() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let mut block = Block::build(&keys[0], 1, &genesis, 5, vec![]).unwrap();
        block.height = 3;
        assert!(matches!(
            block.verify_structure(Some(&genesis)),
            Err(ChainError::ChainGap { expected: 1, got: 3 })
        ));
    }

    #[test]
    fn votes_need_quorum_and_membership() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let mut registry = ValidatorRegistry::new();
        registry.apply_block(&genesis).unwrap();

        let mut block = Block::build(&keys[0], 1, &genesis, 5, vec![]).unwrap();

        // One vote out of four equal stakes: below quorum.
        block.votes = vec![Vote {
            origin: keys[0].public_key(),
            sig: keys[0].sign(block.hash.as_bytes()),
        }];
        assert!(matches!(
            block.verify_votes(&registry),
            Err(ChainError::QuorumNotReached { .. })
        ));

        // Three of four: at quorum.
        block.votes = keys[..3]
            .iter()
            .map(|k| Vote {
                origin: k.public_key(),
                sig: k.sign(block.hash.as_bytes()),
            })
            .collect();
        assert!(block.verify_votes(&registry).is_ok());

        // A signer outside the registry is rejected outright.
        block.votes.push(Vote {
            origin: keypair(99).public_key(),
            sig: keypair(99).sign(block.hash.as_bytes()),
        });
        assert!(block.verify_votes(&registry).is_err());
    }

    #[test]
    fn duplicate_votes_rejected() {
        let (genesis, keys) = genesis::generate_devnet(4);
        let mut registry = ValidatorRegistry::new();
        registry.apply_block(&genesis).unwrap();

        let mut block = Block::build(&keys[0], 1, &genesis, 5, vec![]).unwrap();
        let vote = Vote {
            origin: keys[0].public_key(),
            sig: keys[0].sign(block.hash.as_bytes()),
        };
        block.votes = vec![vote.clone(), vote];
        assert!(block.verify_votes(&registry).is_err());
    }
}
