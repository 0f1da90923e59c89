//! The validator registry.
//!
//! The registry is a pure fold over the committed chain: applying the
//! peer-set commands of every block in order yields the same
//! `public key → (host, port, stake)` map on every node.

use crate::block::Block;
use crate::command::Op;
use crate::error::Result;
use diva_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered validator endpoint with its stake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub stake: u64,
}

/// The current validator set, derived from committed blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorRegistry {
    peers: BTreeMap<PublicKey, Peer>,
}

impl ValidatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a committed block's commands into the registry, in
    /// transaction-sort order and intra-transaction `seq` order.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in &block.tx {
            for cmd in &tx.commands {
                self.apply(&cmd.op);
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::AddPeer {
                host,
                port,
                public_key,
            } => {
                self.peers.insert(
                    *public_key,
                    Peer {
                        host: host.clone(),
                        port: *port,
                        stake: 0,
                    },
                );
            }
            Op::RemovePeer { public_key } => {
                self.peers.remove(public_key);
            }
            Op::ModifyStake { public_key, stake } => {
                if let Some(peer) = self.peers.get_mut(public_key) {
                    peer.stake = (*stake).max(0) as u64;
                }
            }
            Op::Data { .. } | Op::TestLoad { .. } => {}
        }
    }

    /// Returns whether a public key is a registered validator.
    #[must_use]
    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.peers.contains_key(public_key)
    }

    /// Returns a validator's stake, or 0 if unknown.
    #[must_use]
    pub fn stake_of(&self, public_key: &PublicKey) -> u64 {
        self.peers.get(public_key).map_or(0, |p| p.stake)
    }

    /// Returns the registered endpoint for a validator.
    #[must_use]
    pub fn peer(&self, public_key: &PublicKey) -> Option<&Peer> {
        self.peers.get(public_key)
    }

    /// Returns whether any validator is registered at `host:port`.
    #[must_use]
    pub fn has_endpoint(&self, host: &str, port: u16) -> bool {
        self.peers
            .values()
            .any(|p| p.host == host && p.port == port)
    }

    /// The total stake across all validators.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.peers.values().map(|p| p.stake).sum()
    }

    /// The stake-weighted quorum threshold, `⌈2/3 · total⌉`.
    #[must_use]
    pub fn quorum(&self) -> u64 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (2 * total).div_ceil(3)
    }

    /// The number of registered validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if no validators are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterates over validators in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &Peer)> {
        self.peers.iter()
    }

    /// Validator public keys in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<PublicKey> {
        self.peers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::keypair;

    fn add(registry: &mut ValidatorRegistry, seed: u8, stake: i64) -> PublicKey {
        let pk = keypair(seed).public_key();
        registry.apply(&Op::AddPeer {
            host: "127.0.0.1".into(),
            port: 17_000 + seed as u16,
            public_key: pk,
        });
        registry.apply(&Op::ModifyStake {
            public_key: pk,
            stake,
        });
        pk
    }

    #[test]
    fn fold_add_modify_remove() {
        let mut registry = ValidatorRegistry::new();
        let pk = add(&mut registry, 1, 10);

        assert!(registry.contains(&pk));
        assert_eq!(registry.stake_of(&pk), 10);
        assert!(registry.has_endpoint("127.0.0.1", 17_001));

        registry.apply(&Op::RemovePeer { public_key: pk });
        assert!(!registry.contains(&pk));
        assert_eq!(registry.stake_of(&pk), 0);
    }

    #[test]
    fn negative_stake_clamps_to_zero() {
        let mut registry = ValidatorRegistry::new();
        let pk = add(&mut registry, 1, -5);
        assert_eq!(registry.stake_of(&pk), 0);
    }

    #[test]
    fn modify_stake_of_unknown_peer_is_noop() {
        let mut registry = ValidatorRegistry::new();
        registry.apply(&Op::ModifyStake {
            public_key: keypair(1).public_key(),
            stake: 10,
        });
        assert!(registry.is_empty());
    }

    #[test]
    fn quorum_is_two_thirds_ceiling() {
        let mut registry = ValidatorRegistry::new();
        for i in 0..5 {
            add(&mut registry, i, 10);
        }

        assert_eq!(registry.total(), 50);
        // ⌈2/3 · 50⌉ = 34
        assert_eq!(registry.quorum(), 34);

        let empty = ValidatorRegistry::new();
        assert_eq!(empty.quorum(), 0);
    }
}
