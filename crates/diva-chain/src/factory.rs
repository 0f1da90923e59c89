//! The block factory: the consensus state machine.
//!
//! The factory is synchronous and I/O-free: inbound payloads and timer
//! expiries are fed in as calls, and every transition returns the
//! effects (broadcasts, directed sends, commits, timer changes) for the
//! surrounding executor to carry out. All consensus state lives here
//! and is touched from exactly one task.

use crate::block::Block;
use crate::chain::Chain;
use crate::command::Op;
use crate::credit::StakeCreditScheduler;
use crate::error::Result;
use crate::message::Payload;
use crate::pool::TxPool;
use crate::store::BlockStore;
use crate::transaction::Transaction;
use crate::votes::VotePool;
use crate::Signer;
use diva_crypto::{Digest, PublicKey};
use std::collections::BTreeMap;
use std::time::Duration;

/// Blocks served per sync request; requesters re-issue from their new
/// tip until they catch up.
pub const SYNC_PAGE: usize = 128;

/// Bound on out-of-order Confirm blocks buffered during a chain gap.
const GAP_BUFFER_MAX: usize = 64;

/// Factory tuning.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Block format version stamped on proposals.
    pub version: u32,

    /// Base overlay interval; phase deadlines scale with the registry
    /// size.
    pub p2p_interval_ms: u64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            version: crate::genesis::BLOCK_VERSION,
            p2p_interval_ms: 500,
        }
    }
}

/// Consensus phase of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Proposing,
    Signing,
    Confirming,
}

/// Side effects requested by a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Broadcast a payload to all peers.
    Broadcast(Payload),

    /// Send a payload to one peer.
    Send(PublicKey, Payload),

    /// A block was committed; feed it downstream.
    Committed(Block),

    /// Arm (or re-arm) the phase deadline.
    ArmDeadline(Duration),

    /// Cancel the phase deadline.
    ClearDeadline,
}

/// Drives block production and voting for the local node.
pub struct BlockFactory<S: BlockStore, W: Signer> {
    chain: Chain<S>,
    pool: TxPool,
    votes: VotePool,
    credit: StakeCreditScheduler,
    wallet: W,
    config: FactoryConfig,

    phase: Phase,
    candidate: Option<Block>,
    drained: Vec<Transaction>,
    round: u32,
    waiting_height: Option<u64>,
    buffered: BTreeMap<u64, Block>,
}

impl<S: BlockStore, W: Signer> BlockFactory<S, W> {
    /// Creates a factory over an opened chain.
    pub fn new(chain: Chain<S>, wallet: W, config: FactoryConfig) -> Self {
        Self {
            chain,
            pool: TxPool::default(),
            votes: VotePool::new(),
            credit: StakeCreditScheduler::new(),
            wallet,
            config,
            phase: Phase::Idle,
            candidate: None,
            drained: Vec::new(),
            round: 0,
            waiting_height: None,
            buffered: BTreeMap::new(),
        }
    }

    /// The local node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.wallet.public_key()
    }

    /// The current consensus phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The underlying chain.
    #[must_use]
    pub fn chain(&self) -> &Chain<S> {
        &self.chain
    }

    /// Pending transactions, for the admin surface.
    #[must_use]
    pub fn pool_snapshot(&self) -> Vec<Transaction> {
        self.pool.snapshot()
    }

    /// Collected votes, for the admin surface.
    #[must_use]
    pub fn votes_snapshot(&self) -> Vec<(String, Vec<crate::block::Vote>)> {
        self.votes.snapshot()
    }

    /// Whether the local node is a registered validator at the tip.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.chain.registry().contains(&self.public_key())
    }

    /// The phase deadline, scaled by the network size.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        let n = self.chain.registry().len().max(1) as u64;
        Duration::from_millis(n * self.config.p2p_interval_ms)
    }

    /// Stacks local commands into a signed pooled transaction and
    /// gossips it. Returns the transaction ident alongside the
    /// effects.
    pub fn stack(
        &mut self,
        ident: Option<String>,
        ops: Vec<Op>,
        now_ms: u64,
    ) -> Result<(String, Vec<Effect>)> {
        let ident = self.pool.stack(&self.wallet, ident, ops, now_ms)?;

        let key = (self.public_key().to_b64(), ident.clone());
        let effects = match self.pool.get(&key).cloned() {
            Some(transaction) => vec![Effect::Broadcast(Payload::AddTx { transaction })],
            None => Vec::new(),
        };

        Ok((ident, effects))
    }

    /// The computed proposer for a height and fallback round: the
    /// `round`-th validator by 256-bit distance between its public key
    /// and `H(previousHash ∥ height)`, ties broken lexicographically.
    #[must_use]
    pub fn proposer_for(&self, height: u64, round: u32) -> Option<PublicKey> {
        let registry = self.chain.registry();
        if registry.is_empty() {
            return None;
        }

        let payload = format!("{}{}", self.chain.tip().hash, height);
        let target = *Digest::compute(payload.as_bytes()).as_bytes();

        let mut ranked = registry.keys();
        ranked.sort_by(|a, b| {
            distance(a.as_bytes(), &target)
                .cmp(&distance(b.as_bytes(), &target))
                .then_with(|| a.cmp(b))
        });

        Some(ranked[round as usize % ranked.len()])
    }

    /// Drain tick: when the pool holds work, either propose (if the
    /// local node is the computed proposer) or start waiting for the
    /// proposer's block.
    pub fn on_stack_ready(&mut self, now_ms: u64) -> Vec<Effect> {
        if self.phase != Phase::Idle || self.pool.is_empty() || !self.is_member() {
            return Vec::new();
        }

        let height = self.chain.height() + 1;
        let Some(proposer) = self.proposer_for(height, self.round) else {
            return Vec::new();
        };

        if proposer == self.public_key() {
            return self.propose(now_ms);
        }

        // Losing the race to the same peer repeatedly accumulates
        // negative credit; one decrement per height cycle.
        if self.waiting_height != Some(height) {
            self.waiting_height = Some(height);
            let quorum = self.chain.registry().quorum();
            self.credit.dec(&proposer, quorum);
            return vec![Effect::ArmDeadline(self.deadline())];
        }

        Vec::new()
    }

    fn propose(&mut self, now_ms: u64) -> Vec<Effect> {
        self.phase = Phase::Proposing;
        self.drained = self.pool.drain_for_candidate();
        if self.drained.is_empty() {
            self.phase = Phase::Idle;
            return Vec::new();
        }

        let block = match Block::build(
            &self.wallet,
            self.config.version,
            self.chain.tip(),
            now_ms,
            self.drained.clone(),
        ) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(error = %e, "candidate assembly failed");
                let drained = std::mem::take(&mut self.drained);
                self.pool.restore(drained);
                self.phase = Phase::Idle;
                return Vec::new();
            }
        };

        // The proposer's own vote counts toward the quorum.
        let own_sig = self.wallet.sign(block.hash.as_bytes());
        if let Err(e) =
            self.votes
                .add(&block.hash, self.public_key(), own_sig, self.chain.registry())
        {
            tracing::warn!(error = %e, "own vote rejected");
        }

        tracing::debug!(height = block.height, hash = %block.hash, tx = block.tx.len(), "proposing");

        // A single-validator registry reaches quorum with the
        // proposer's own vote; confirm without waiting for Signs.
        let registry = self.chain.registry();
        if self.votes.stake_for(&block.hash, registry) >= registry.quorum() {
            let mut confirmed = block.clone();
            confirmed.votes = self.votes.take(&block.hash);
            self.phase = Phase::Confirming;

            let mut effects = vec![Effect::Broadcast(Payload::Confirm {
                block: confirmed.clone(),
            })];
            self.commit(confirmed, &mut effects);
            return effects;
        }

        self.candidate = Some(block.clone());
        self.phase = Phase::Signing;

        vec![
            Effect::Broadcast(Payload::Propose { block }),
            Effect::ArmDeadline(self.deadline()),
        ]
    }

    /// Adds a gossiped transaction to the local pool.
    pub fn on_add_tx(&mut self, transaction: Transaction) -> Vec<Effect> {
        if let Err(e) = self.pool.add_remote(transaction) {
            tracing::debug!(error = %e, "remote transaction dropped");
        }
        Vec::new()
    }

    /// Handles a block proposal from a peer. Invalid proposals are
    /// dropped silently and not relayed.
    pub fn on_propose(&mut self, block: Block, sender: PublicKey) -> Vec<Effect> {
        if block.origin != sender {
            tracing::debug!("propose relayed origin mismatch, dropped");
            return Vec::new();
        }
        if block.height != self.chain.height() + 1 || self.candidate.is_some() {
            tracing::debug!(height = block.height, "stale or competing propose, dropped");
            return Vec::new();
        }
        if self.proposer_for(block.height, self.round) != Some(block.origin) {
            tracing::debug!(origin = %block.origin.short_id(), "propose from non-proposer, dropped");
            return Vec::new();
        }
        if let Err(e) = block.verify_structure(Some(self.chain.tip())) {
            tracing::debug!(error = %e, "invalid propose, dropped");
            return Vec::new();
        }

        let block_hash = block.hash.clone();
        self.candidate = Some(block);
        self.phase = Phase::Signing;

        // A node outside the registry (still bootstrapping) caches the
        // candidate but has no vote to contribute.
        if !self.is_member() {
            return vec![Effect::ArmDeadline(self.deadline())];
        }

        // Record our own vote locally; the broadcast reaches everyone
        // but ourselves.
        let sig = self.wallet.sign(block_hash.as_bytes());
        if let Err(e) = self
            .votes
            .add(&block_hash, self.public_key(), sig, self.chain.registry())
        {
            tracing::debug!(error = %e, "own vote rejected");
        }

        vec![
            Effect::Broadcast(Payload::Sign {
                block_hash,
                signature: sig,
            }),
            Effect::ArmDeadline(self.deadline()),
        ]
    }

    /// Handles a vote from a peer. Once the proposer's candidate holds
    /// a stake-weighted quorum, the confirm round starts.
    pub fn on_sign(
        &mut self,
        block_hash: String,
        signature: diva_crypto::Signature,
        sender: PublicKey,
    ) -> Vec<Effect> {
        let Some(candidate) = &self.candidate else {
            tracing::debug!("sign without candidate, dropped");
            return Vec::new();
        };
        if candidate.hash != block_hash {
            tracing::debug!("sign for foreign candidate, dropped");
            return Vec::new();
        }

        match self
            .votes
            .add(&block_hash, sender, signature, self.chain.registry())
        {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(e) => {
                tracing::debug!(error = %e, "invalid sign, dropped");
                return Vec::new();
            }
        }

        // Only the proposer aggregates the quorum.
        if self.phase != Phase::Signing || candidate.origin != self.public_key() {
            return Vec::new();
        }

        let registry = self.chain.registry();
        if self.votes.stake_for(&block_hash, registry) < registry.quorum() {
            return Vec::new();
        }

        let Some(mut block) = self.candidate.take() else {
            return Vec::new();
        };
        block.votes = self.votes.take(&block_hash);
        self.phase = Phase::Confirming;

        let mut effects = vec![Effect::Broadcast(Payload::Confirm {
            block: block.clone(),
        })];
        self.commit(block, &mut effects);
        effects
    }

    /// Handles a quorum-carrying block. Verification failures drop the
    /// block; a height gap buffers it and requests a sync instead.
    pub fn on_confirm(&mut self, block: Block, sender: PublicKey) -> Vec<Effect> {
        let expected = self.chain.height() + 1;

        if block.height < expected {
            // First valid Confirm per height wins; later ones are noise.
            return Vec::new();
        }

        if block.height > expected {
            let from = expected;
            let to = block.height;
            if self.buffered.len() < GAP_BUFFER_MAX {
                self.buffered.insert(block.height, block);
            }
            return vec![Effect::Send(
                sender,
                Payload::Sync {
                    from_height: from,
                    to_height: to,
                },
            )];
        }

        match self.chain.append(block.clone()) {
            Ok(()) => {
                let mut effects = Vec::new();
                self.commit_bookkeeping(&block, &mut effects);
                self.drain_gap_buffer(&mut effects);
                effects
            }
            Err(e) => {
                tracing::debug!(height = block.height, error = %e, "invalid confirm, dropped");
                Vec::new()
            }
        }
    }

    /// Serves a sync request with stored blocks as Confirm payloads.
    pub fn on_sync(&mut self, from_height: u64, to_height: u64, sender: PublicKey) -> Vec<Effect> {
        let from = from_height.max(1);
        let to = to_height.min(self.chain.height());
        if from > to {
            return Vec::new();
        }

        match self.chain.range(from, to, SYNC_PAGE) {
            Ok(blocks) => blocks
                .into_iter()
                .map(|block| Effect::Send(sender, Payload::Confirm { block }))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "sync read failed");
                Vec::new()
            }
        }
    }

    /// Phase deadline expiry: reset to Idle and fall through to the
    /// next-closest proposer. Timeouts never commit.
    pub fn on_deadline(&mut self) -> Vec<Effect> {
        tracing::debug!(round = self.round, phase = ?self.phase, "phase deadline expired");

        let drained = std::mem::take(&mut self.drained);
        self.pool.restore(drained);
        self.candidate = None;
        self.votes.clear();
        self.waiting_height = None;
        self.round += 1;
        self.phase = Phase::Idle;

        Vec::new()
    }

    /// Credit-window expiry: stack the accumulated stake corrections
    /// as one transaction.
    pub fn on_credit_window(&mut self, now_ms: u64) -> Vec<Effect> {
        let ops = self.credit.flush(self.chain.registry());
        if ops.is_empty() {
            return Vec::new();
        }

        match self.stack(None, ops, now_ms) {
            Ok((_, effects)) => effects,
            Err(e) => {
                tracing::debug!(error = %e, "stake-credit stack suppressed");
                Vec::new()
            }
        }
    }

    fn commit(&mut self, block: Block, effects: &mut Vec<Effect>) {
        match self.chain.append(block.clone()) {
            Ok(()) => {
                self.commit_bookkeeping(&block, effects);
                self.drain_gap_buffer(effects);
            }
            Err(e) => {
                // Quorum was verified above; only local I/O can fail
                // here. Reset and let the next cycle retry.
                tracing::error!(error = %e, "commit failed");
                let drained = std::mem::take(&mut self.drained);
                self.pool.restore(drained);
                self.candidate = None;
                self.votes.clear();
                self.phase = Phase::Idle;
                effects.push(Effect::ClearDeadline);
            }
        }
    }

    fn commit_bookkeeping(&mut self, block: &Block, effects: &mut Vec<Effect>) {
        // Drained entries go back first, then everything the committed
        // block includes is superseded.
        let drained = std::mem::take(&mut self.drained);
        self.pool.restore(drained);
        self.pool.remove_committed(block);

        self.votes.clear();
        self.candidate = None;
        self.round = 0;
        self.waiting_height = None;
        self.phase = Phase::Idle;

        // The proposer delivered: restore its credit.
        if block.origin != self.public_key() {
            self.credit.inc(&block.origin);
        }

        effects.push(Effect::Committed(block.clone()));
        effects.push(Effect::ClearDeadline);
    }

    fn drain_gap_buffer(&mut self, effects: &mut Vec<Effect>) {
        while let Some(block) = self.buffered.remove(&(self.chain.height() + 1)) {
            match self.chain.append(block.clone()) {
                Ok(()) => self.commit_bookkeeping(&block, effects),
                Err(e) => {
                    tracing::debug!(height = block.height, error = %e, "buffered block invalid");
                    break;
                }
            }
        }
        self.buffered.retain(|h, _| *h > self.chain.height());
    }
}

/// 256-bit absolute difference of two big-endian byte strings.
fn distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };

    let mut out = [0u8; 32];
    let mut borrow = 0u16;
    for i in (0..32).rev() {
        let top = u16::from(hi[i]);
        let bottom = u16::from(lo[i]) + borrow;
        if top >= bottom {
            out[i] = (top - bottom) as u8;
            borrow = 0;
        } else {
            out[i] = (top + 256 - bottom) as u8;
            borrow = 1;
        }
    }
    out
}
