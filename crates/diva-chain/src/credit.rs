//! Stake-credit fairness accounting.
//!
//! A transient, per-node counter that biases which node stacks
//! `modifyStake` transactions. Losing the proposer race to a peer
//! decrements that peer's credit (subject to floors); a peer whose
//! block commits earns the credit back. Credits that stay negative
//! mark a proposer that wins races without delivering, and the
//! windowed flush turns them into stake corrections. The mechanism is
//! advisory: it shapes locally stacked transactions only, never the
//! consensus rules, and is never persisted.

use crate::command::Op;
use crate::registry::ValidatorRegistry;
use diva_crypto::PublicKey;
use std::collections::BTreeMap;

/// Per-validator stake-credit counters.
#[derive(Debug, Default)]
pub struct StakeCreditScheduler {
    credit: BTreeMap<PublicKey, i64>,
}

impl StakeCreditScheduler {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lost proposer race against `target`.
    ///
    /// The decrement is admitted only while `credit[target]` stays
    /// above `-0.5 · quorum` and the credit sum stays above
    /// `-1 · quorum`; otherwise it is suppressed. Returns whether the
    /// decrement was admitted.
    pub fn dec(&mut self, target: &PublicKey, quorum: u64) -> bool {
        let current = self.credit_of(target);
        let target_floor = quorum as f64 * -0.5;
        let global_floor = quorum as f64 * -1.0;

        if (current as f64) <= target_floor {
            return false;
        }
        if (self.total() as f64) <= global_floor {
            return false;
        }

        *self.credit.entry(*target).or_insert(0) -= 1;
        true
    }

    /// Restores one credit to `target`, invoked when its block commits.
    pub fn inc(&mut self, target: &PublicKey) {
        let entry = self.credit.entry(*target).or_insert(0);
        *entry += 1;
        if *entry == 0 {
            self.credit.remove(target);
        }
    }

    /// The credit of a single validator.
    #[must_use]
    pub fn credit_of(&self, target: &PublicKey) -> i64 {
        self.credit.get(target).copied().unwrap_or(0)
    }

    /// The credit sum across all validators.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.credit.values().sum()
    }

    /// Drains the accumulated credits into `modifyStake` operations.
    ///
    /// Each non-zero credit of a still-registered validator becomes one
    /// command setting its stake to `stake + credit`, clamped at zero.
    /// Flushed entries are cleared.
    #[must_use]
    pub fn flush(&mut self, registry: &ValidatorRegistry) -> Vec<Op> {
        let credits = std::mem::take(&mut self.credit);

        credits
            .into_iter()
            .filter(|(pk, credit)| *credit != 0 && registry.contains(pk))
            .map(|(pk, credit)| Op::ModifyStake {
                public_key: pk,
                stake: (registry.stake_of(&pk) as i64 + credit).max(0),
            })
            .collect()
    }
}
