//! Divachain consensus core.
//!
//! This crate is the consensus-and-block-production subsystem of a
//! permissioned divachain node:
//!
//! - [`Command`]/[`Transaction`]: signed validator intents
//! - [`Block`]: hash-chained, quorum-voted container of transactions
//! - [`ValidatorRegistry`]: the peer/stake set folded from the chain
//! - [`TxPool`] / [`VotePool`]: in-memory pending state
//! - [`Envelope`] / [`Router`]: signed overlay messages with replay
//!   suppression
//! - [`BlockFactory`]: the propose → sign → confirm state machine
//! - [`StakeCreditScheduler`]: advisory proposer-fairness accounting
//! - [`Chain`] over a [`BlockStore`]: verified appends plus the
//!   registry fold
//!
//! The factory is synchronous and effect-based; the node binary owns
//! the single executor task that feeds it messages and timers and
//! carries out its effects.
//!
//! # Transaction flow
//!
//! ```text
//! client commands ──▶ stack() ──▶ TxPool ──▶ candidate Block
//!                                               │ Propose
//!                                               ▼
//!                     peers verify ──▶ Sign ──▶ VotePool (quorum)
//!                                               │ Confirm
//!                                               ▼
//!                     every node verifies ──▶ Chain::append ──▶ feed
//! ```

mod block;
pub mod canonical;
mod chain;
mod command;
mod credit;
mod error;
mod factory;
pub mod genesis;
mod message;
mod pool;
mod registry;
mod store;
mod transaction;
mod votes;

pub use block::{Block, Vote};
pub use chain::Chain;
pub use command::{number, Command, Op};
pub use credit::StakeCreditScheduler;
pub use error::{ChainError, Result};
pub use factory::{BlockFactory, Effect, FactoryConfig, Phase, SYNC_PAGE};
pub use message::{Envelope, Payload, Router, MAX_HOPS, MSG_IDENT_MAX_LEN};
pub use pool::TxPool;
pub use registry::{Peer, ValidatorRegistry};
pub use store::{BlockStore, MemoryBlockStore};
pub use transaction::{random_ident, validate_ident, Transaction, IDENT_MAX_LEN};
pub use votes::VotePool;

use diva_crypto::{Keypair, PublicKey, Signature};

/// Signing capability handed to the consensus core.
///
/// The wallet owns the secret key exclusively; the core only ever sees
/// this narrow seam.
pub trait Signer {
    /// The signer's public key.
    fn public_key(&self) -> PublicKey;

    /// Produces a detached signature over a message.
    fn sign(&self, message: &[u8]) -> Signature;
}

impl Signer for Keypair {
    fn public_key(&self) -> PublicKey {
        Keypair::public_key(self)
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Keypair::sign(self, message)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use diva_crypto::Keypair;

    /// A deterministic keypair for tests.
    pub fn keypair(seed: u8) -> Keypair {
        Keypair::from_secret_bytes(&[seed; 32]).expect("32-byte seed")
    }
}
