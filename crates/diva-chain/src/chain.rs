//! The chain facade: verified appends over a block store plus the
//! registry fold.
//!
//! `append` is the single commit path: structure and votes are checked
//! against the tip and the registry in force at `height - 1`, then the
//! block is persisted and its commands applied. Committed blocks are
//! never rolled back.

use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::genesis;
use crate::registry::ValidatorRegistry;
use crate::store::BlockStore;

/// A verified, height-indexed chain with its derived registry.
pub struct Chain<S: BlockStore> {
    store: S,
    registry: ValidatorRegistry,
    tip: Block,
}

impl<S: BlockStore> Chain<S> {
    /// Opens a chain over a store, seeding it with the genesis block
    /// when empty, and replays the registry up to the stored tip.
    pub fn open(mut store: S, genesis_block: Block) -> Result<Self> {
        genesis::validate(&genesis_block)?;

        let tip_height = match store.height()? {
            Some(h) => h,
            None => {
                store.put(&genesis_block)?;
                0
            }
        };

        let stored_genesis = store
            .get(0)?
            .ok_or(ChainError::BlockNotFound(0))?;
        if stored_genesis.hash != genesis_block.hash {
            return Err(ChainError::InvalidGenesis(
                "stored chain does not match the configured genesis".into(),
            ));
        }

        let mut registry = ValidatorRegistry::new();
        let mut tip = stored_genesis;
        registry.apply_block(&tip)?;

        for height in 1..=tip_height {
            let block = store
                .get(height)?
                .ok_or(ChainError::BlockNotFound(height))?;
            block.verify_structure(Some(&tip))?;
            registry.apply_block(&block)?;
            tip = block;
        }

        Ok(Self {
            store,
            registry,
            tip,
        })
    }

    /// Verifies and commits a block at `tip + 1`.
    pub fn append(&mut self, block: Block) -> Result<()> {
        block.verify_structure(Some(&self.tip))?;
        block.verify_votes(&self.registry)?;

        self.store.put(&block)?;
        self.registry.apply_block(&block)?;
        self.tip = block;

        tracing::info!(
            height = self.tip.height,
            hash = %self.tip.hash,
            tx = self.tip.tx.len(),
            votes = self.tip.votes.len(),
            "block committed"
        );

        Ok(())
    }

    /// The current tip block.
    #[must_use]
    pub fn tip(&self) -> &Block {
        &self.tip
    }

    /// The current tip height.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.tip.height
    }

    /// The registry at the current tip.
    #[must_use]
    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// The registry state after applying blocks `0..=height`.
    pub fn snapshot_at(&self, height: u64) -> Result<ValidatorRegistry> {
        if height > self.tip.height {
            return Err(ChainError::BlockNotFound(height));
        }

        let mut registry = ValidatorRegistry::new();
        for h in 0..=height {
            let block = self.store.get(h)?.ok_or(ChainError::BlockNotFound(h))?;
            registry.apply_block(&block)?;
        }
        Ok(registry)
    }

    /// Fetches the block at a height.
    pub fn get(&self, height: u64) -> Result<Option<Block>> {
        self.store.get(height)
    }

    /// Fetches blocks with heights in `gte..=lte`, at most `limit`.
    pub fn range(&self, gte: u64, lte: u64, limit: usize) -> Result<Vec<Block>> {
        self.store.range(gte, lte, limit)
    }

    /// Whether a peer endpoint exists in the registry at the tip.
    #[must_use]
    pub fn has_endpoint(&self, host: &str, port: u16) -> bool {
        self.registry.has_endpoint(host, port)
    }
}
