//! Copy-out snapshots and the API command channel.
//!
//! Consensus state is owned by the core executor task; the HTTP layer
//! reads snapshots refreshed by that task and submits mutations over a
//! channel, so no handler ever touches consensus state directly.

use diva_chain::{Block, Command, Phase, Transaction, Vote};
use diva_crypto::PublicKey;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

/// A registry entry as served by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPeer {
    pub public_key: PublicKey,
    pub host: String,
    pub port: u16,
    pub stake: u64,
}

/// Votes collected for one candidate hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSet {
    pub block_hash: String,
    pub votes: Vec<Vote>,
}

/// Read-only snapshots refreshed by the core executor.
pub struct NodeState {
    public_key: PublicKey,
    tip: RwLock<Block>,
    phase: RwLock<Phase>,
    network: RwLock<Vec<NetworkPeer>>,
    pool: RwLock<Vec<Transaction>>,
    votes: RwLock<Vec<VoteSet>>,
}

impl NodeState {
    /// Creates the snapshot holder with the genesis tip.
    #[must_use]
    pub fn new(public_key: PublicKey, tip: Block) -> Self {
        Self {
            public_key,
            tip: RwLock::new(tip),
            phase: RwLock::new(Phase::Idle),
            network: RwLock::new(Vec::new()),
            pool: RwLock::new(Vec::new()),
            votes: RwLock::new(Vec::new()),
        }
    }

    /// The local node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The latest committed block.
    #[must_use]
    pub fn tip(&self) -> Block {
        self.tip.read().clone()
    }

    /// The current consensus phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// The registry view at the tip.
    #[must_use]
    pub fn network(&self) -> Vec<NetworkPeer> {
        self.network.read().clone()
    }

    /// Pending transactions.
    #[must_use]
    pub fn pool(&self) -> Vec<Transaction> {
        self.pool.read().clone()
    }

    /// Collected votes.
    #[must_use]
    pub fn votes(&self) -> Vec<VoteSet> {
        self.votes.read().clone()
    }

    /// Replaces all snapshots; called from the core executor only.
    pub fn refresh(
        &self,
        tip: Block,
        phase: Phase,
        network: Vec<NetworkPeer>,
        pool: Vec<Transaction>,
        votes: Vec<VoteSet>,
    ) {
        *self.tip.write() = tip;
        *self.phase.write() = phase;
        *self.network.write() = network;
        *self.pool.write() = pool;
        *self.votes.write() = votes;
    }
}

/// Mutations and store reads routed onto the core executor.
#[derive(Debug)]
pub enum ApiCommand {
    /// Stack client commands into a local transaction.
    Stack {
        commands: Vec<Command>,
        resp: oneshot::Sender<diva_chain::Result<String>>,
    },

    /// Fetch one block by height.
    GetBlock {
        height: u64,
        resp: oneshot::Sender<Option<Block>>,
    },

    /// Fetch a bounded height range.
    Range {
        gte: u64,
        lte: u64,
        limit: usize,
        resp: oneshot::Sender<Vec<Block>>,
    },
}

/// Sender half handed to the HTTP layer.
pub type ApiSender = mpsc::Sender<ApiCommand>;
