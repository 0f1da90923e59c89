//! The transaction pool.
//!
//! Holds pending transactions keyed by `(origin, ident)` in insertion
//! order. Local commands enter through [`TxPool::stack`], peer
//! transactions through [`TxPool::add_remote`]; a proposal drains at
//! most one transaction per origin, and a failed cycle returns the
//! drained entries unless a later commit superseded them.

use crate::block::Block;
use crate::command::{self, Op};
use crate::error::{ChainError, Result};
use crate::transaction::{self, Transaction};
use crate::Signer;
use std::collections::{HashSet, VecDeque};

/// Default capacity bound; the oldest entries are dropped beyond it.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Pending transactions awaiting inclusion.
#[derive(Debug)]
pub struct TxPool {
    capacity: usize,
    entries: VecDeque<Transaction>,
    index: HashSet<(String, String)>,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TxPool {
    /// Creates a pool with the given capacity bound.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            index: HashSet::new(),
        }
    }

    /// Stacks local commands into a signed transaction.
    ///
    /// Assigns sequential `seq` numbers, generates an ident when none
    /// is given, signs with the local wallet and appends to the pool.
    /// Returns the transaction's ident.
    pub fn stack<S: Signer>(
        &mut self,
        signer: &S,
        ident: Option<String>,
        ops: Vec<Op>,
        timestamp: u64,
    ) -> Result<String> {
        let ident = match ident {
            Some(ident) => {
                transaction::validate_ident(&ident)?;
                ident
            }
            None => transaction::random_ident(),
        };

        let tx = Transaction::build(signer, ident.clone(), timestamp, command::number(ops))?;
        self.insert(tx)?;
        Ok(ident)
    }

    /// Adds a transaction received from a peer, after verification.
    pub fn add_remote(&mut self, tx: Transaction) -> Result<()> {
        tx.verify()?;
        self.insert(tx)
    }

    fn insert(&mut self, tx: Transaction) -> Result<()> {
        let key = tx.key();
        if self.index.contains(&key) {
            return Err(ChainError::DuplicateTransaction(format!(
                "{}:{}",
                tx.origin.short_id(),
                tx.ident
            )));
        }

        while self.entries.len() >= self.capacity {
            if let Some(old) = self.entries.pop_front() {
                self.index.remove(&old.key());
                tracing::debug!(ident = %old.ident, "evicted transaction at capacity");
            } else {
                break;
            }
        }

        self.index.insert(key);
        self.entries.push_back(tx);
        Ok(())
    }

    /// Drains the pool into a candidate set: the first pending
    /// transaction of each origin, in insertion order. Later
    /// transactions of the same origin stay pooled for the next cycle.
    pub fn drain_for_candidate(&mut self) -> Vec<Transaction> {
        let mut taken_origins = HashSet::new();
        let mut candidate = Vec::new();
        let mut rest = VecDeque::new();

        for tx in self.entries.drain(..) {
            if taken_origins.insert(tx.origin) {
                self.index.remove(&tx.key());
                candidate.push(tx);
            } else {
                rest.push_back(tx);
            }
        }

        self.entries = rest;
        candidate
    }

    /// Returns drained transactions to the pool after a failed cycle,
    /// skipping any whose `(origin, ident)` is already present again.
    pub fn restore(&mut self, txs: Vec<Transaction>) {
        let mut restored = VecDeque::with_capacity(txs.len() + self.entries.len());
        for tx in txs {
            let key = tx.key();
            if self.index.insert(key) {
                restored.push_back(tx);
            }
        }
        restored.append(&mut self.entries);
        self.entries = restored;
    }

    /// Drops every pooled transaction that a committed block includes.
    pub fn remove_committed(&mut self, block: &Block) {
        let committed: HashSet<(String, String)> =
            block.tx.iter().map(Transaction::key).collect();

        self.entries.retain(|tx| !committed.contains(&tx.key()));
        self.index.retain(|key| !committed.contains(key));
    }

    /// Whether a `(origin, ident)` pair is pending.
    #[must_use]
    pub fn contains(&self, key: &(String, String)) -> bool {
        self.index.contains(key)
    }

    /// Fetches a pending transaction by its `(origin, ident)` key.
    #[must_use]
    pub fn get(&self, key: &(String, String)) -> Option<&Transaction> {
        if !self.index.contains(key) {
            return None;
        }
        self.entries.iter().find(|tx| &tx.key() == key)
    }

    /// The number of pending transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of the pending transactions, for the admin surface.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.iter().cloned().collect()
    }
}
