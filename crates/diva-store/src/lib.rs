//! RocksDB-backed block store.
//!
//! Blocks live in the `blocks` column family under big-endian 8-byte
//! height keys; the `meta` column family holds the tip height. Values
//! are the canonical encoding of the block, so on-disk bytes are
//! byte-identical across nodes.
//!
//! All storage failures are typed as [`StoreError`]; the
//! [`BlockStore`] impl converts at the trait boundary.

mod error;

pub use error::StoreError;

use diva_chain::{canonical, Block, BlockStore, Result};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::Path;

const CF_BLOCKS: &str = "blocks";
const CF_META: &str = "meta";
const KEY_TIP: &[u8] = b"tip";

/// RocksDB-backed implementation of [`BlockStore`].
pub struct RocksDbBlockStore {
    db: DB,
}

impl RocksDbBlockStore {
    /// Opens (or creates) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cfs)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &'static str) -> std::result::Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn read_tip(&self) -> std::result::Result<Option<u64>, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(cf, KEY_TIP)? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::CorruptedMeta("tip height length"))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
        }
    }

    fn read_block(&self, height: u64) -> std::result::Result<Option<Block>, StoreError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(cf, height_key(height))? {
            None => Ok(None),
            Some(bytes) => {
                let block = serde_json::from_slice(&bytes)
                    .map_err(|source| StoreError::CorruptedBlock { height, source })?;
                Ok(Some(block))
            }
        }
    }

    fn write_block(&mut self, block: &Block) -> std::result::Result<(), StoreError> {
        let expected = match self.read_tip()? {
            Some(tip) => tip + 1,
            None => 0,
        };
        if block.height != expected {
            return Err(StoreError::NonContiguous {
                height: block.height,
                expected,
            });
        }

        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(cf_blocks, height_key(block.height), canonical::block(block));
        batch.put_cf(cf_meta, KEY_TIP, block.height.to_be_bytes());

        self.db.write(batch)?;

        tracing::trace!(height = block.height, "block persisted");
        Ok(())
    }
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

impl BlockStore for RocksDbBlockStore {
    fn height(&self) -> Result<Option<u64>> {
        Ok(self.read_tip()?)
    }

    fn get(&self, height: u64) -> Result<Option<Block>> {
        Ok(self.read_block(height)?)
    }

    fn put(&mut self, block: &Block) -> Result<()> {
        Ok(self.write_block(block)?)
    }
}
