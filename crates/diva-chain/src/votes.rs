//! The vote pool.
//!
//! Collects `Sign` signatures per candidate block hash. Entries are
//! purged when their hash commits or when the chain advances past the
//! candidate.

use crate::block::Vote;
use crate::error::{ChainError, Result};
use crate::registry::ValidatorRegistry;
use diva_crypto::{PublicKey, Signature};
use std::collections::{BTreeMap, HashMap};

/// Signatures collected per candidate block hash.
#[derive(Debug, Default)]
pub struct VotePool {
    votes: HashMap<String, BTreeMap<PublicKey, Signature>>,
}

impl VotePool {
    /// Creates an empty vote pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a verified vote for a block hash.
    ///
    /// The signer must be a registry member and the signature must
    /// cover the hash. Returns `true` if the vote was new.
    pub fn add(
        &mut self,
        block_hash: &str,
        origin: PublicKey,
        sig: Signature,
        registry: &ValidatorRegistry,
    ) -> Result<bool> {
        if !registry.contains(&origin) {
            return Err(ChainError::NotInRegistry(origin.short_id()));
        }
        origin
            .verify(block_hash.as_bytes(), &sig)
            .map_err(|_| ChainError::InvalidVote(format!("signature of {}", origin.short_id())))?;

        let entry = self.votes.entry(block_hash.to_string()).or_default();
        Ok(entry.insert(origin, sig).is_none())
    }

    /// The stake-weighted sum of collected votes for a hash.
    #[must_use]
    pub fn stake_for(&self, block_hash: &str, registry: &ValidatorRegistry) -> u64 {
        self.votes.get(block_hash).map_or(0, |signers| {
            signers.keys().map(|pk| registry.stake_of(pk)).sum()
        })
    }

    /// The number of distinct signers for a hash.
    #[must_use]
    pub fn count(&self, block_hash: &str) -> usize {
        self.votes.get(block_hash).map_or(0, BTreeMap::len)
    }

    /// Removes and returns the votes for a hash, sorted by signer.
    #[must_use]
    pub fn take(&mut self, block_hash: &str) -> Vec<Vote> {
        self.votes
            .remove(block_hash)
            .map(|signers| {
                signers
                    .into_iter()
                    .map(|(origin, sig)| Vote { origin, sig })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every collected vote. Called on commit and on candidate
    /// abandonment; stale hashes can never become committable again.
    pub fn clear(&mut self) {
        self.votes.clear();
    }

    /// A copy of the collected votes, for the admin surface.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Vec<Vote>)> {
        self.votes
            .iter()
            .map(|(hash, signers)| {
                let votes = signers
                    .iter()
                    .map(|(origin, sig)| Vote {
                        origin: *origin,
                        sig: *sig,
                    })
                    .collect();
                (hash.clone(), votes)
            })
            .collect()
    }
}
