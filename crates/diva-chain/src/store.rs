//! Block storage trait and the in-memory implementation.

use crate::block::Block;
use crate::error::{ChainError, Result};

/// Append-only, height-indexed block storage.
///
/// Implementations persist blocks exactly as given; all verification
/// happens in [`crate::chain::Chain`] before a block reaches the store.
pub trait BlockStore: Send {
    /// The height of the stored tip, or `None` when empty.
    fn height(&self) -> Result<Option<u64>>;

    /// Fetches the block at a height.
    fn get(&self, height: u64) -> Result<Option<Block>>;

    /// Persists a block at its height. Must reject non-contiguous
    /// writes.
    fn put(&mut self, block: &Block) -> Result<()>;

    /// Fetches blocks with heights in `gte..=lte`, at most `limit`.
    fn range(&self, gte: u64, lte: u64, limit: usize) -> Result<Vec<Block>> {
        let top = match self.height()? {
            Some(h) => h.min(lte),
            None => return Ok(Vec::new()),
        };

        let mut blocks = Vec::new();
        let mut height = gte;
        while height <= top && blocks.len() < limit {
            match self.get(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
            height += 1;
        }
        Ok(blocks)
    }
}

/// In-memory block store for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: Vec<Block>,
}

impl MemoryBlockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn height(&self) -> Result<Option<u64>> {
        Ok(self.blocks.last().map(|b| b.height))
    }

    fn get(&self, height: u64) -> Result<Option<Block>> {
        Ok(self.blocks.get(height as usize).cloned())
    }

    fn put(&mut self, block: &Block) -> Result<()> {
        if block.height != self.blocks.len() as u64 {
            return Err(ChainError::Store(format!(
                "non-contiguous write at height {}",
                block.height
            )));
        }
        self.blocks.push(block.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis;

    #[test]
    fn memory_store_roundtrip() {
        let (genesis, _) = genesis::generate_devnet(4);
        let mut store = MemoryBlockStore::new();

        assert_eq!(store.height().unwrap(), None);
        store.put(&genesis).unwrap();
        assert_eq!(store.height().unwrap(), Some(0));
        assert_eq!(store.get(0).unwrap().unwrap().hash, genesis.hash);
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn memory_store_rejects_gaps() {
        let (genesis, _) = genesis::generate_devnet(4);
        let mut store = MemoryBlockStore::new();
        store.put(&genesis).unwrap();

        let mut skipped = genesis.clone();
        skipped.height = 2;
        assert!(store.put(&skipped).is_err());
    }

    #[test]
    fn range_is_bounded() {
        let (genesis, _) = genesis::generate_devnet(4);
        let mut store = MemoryBlockStore::new();
        store.put(&genesis).unwrap();

        let blocks = store.range(0, 100, 5).unwrap();
        assert_eq!(blocks.len(), 1);

        let none = store.range(5, 10, 5).unwrap();
        assert!(none.is_empty());
    }
}
