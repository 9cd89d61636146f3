//! Fixed capacity cache of equally sized blocks of a backing file.
//!
//! In lazy mode at most `capacity` blocks are resident.
//! A miss reuses a free slot or evicts the least recently used block and reads the requested block into its slot.
//! In preload mode the whole block range is read once and every access is a pure offset computation.

use crate::error::*;
use lru::LruCache;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

/// Block id within the cached range, 0 is the first block after `offset`.
pub type BlockId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Blocks read from the backing file.
    pub loads: u64,
    pub evictions: u64,
}

enum Residency {
    Preloaded,
    Lazy {
        // block id -> slot, ordered by recency
        lru: LruCache<BlockId, usize>,
        capacity: usize,
        // allocated slots without a valid block
        free: Vec<usize>,
    },
}

pub struct BlockCache<R> {
    reader: R,
    // byte offset of block 0 in the backing file
    offset: u64,
    block_size: usize,
    num_blocks: u32,
    data: Vec<u8>,
    residency: Residency,
    stats: CacheStats,
}

impl<R: Read + Seek> BlockCache<R> {
    /// Cache with room for `capacity` blocks, reading lazily from `reader`.
    pub fn lazy(reader: R, offset: u64, block_size: usize, num_blocks: u32, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| Error::InvalidInput("block cache capacity must be positive".to_string()))?;
        let capacity = capacity.get().min(num_blocks.max(1) as usize);
        Ok(BlockCache {
            reader,
            offset,
            block_size,
            num_blocks,
            data: Vec::new(),
            residency: Residency::Lazy {
                lru: LruCache::unbounded(),
                capacity,
                free: Vec::new(),
            },
            stats: CacheStats::default(),
        })
    }

    /// Read all `num_blocks` blocks from `reader` into memory.
    pub fn preload(mut reader: R, offset: u64, block_size: usize, num_blocks: u32) -> Result<Self> {
        let mut data = vec![0; block_size * num_blocks as usize];
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut data)?;
        tracing::debug!(blocks = num_blocks, bytes = data.len(), "preloaded block range");
        Ok(BlockCache {
            reader,
            offset,
            block_size,
            num_blocks,
            data,
            residency: Residency::Preloaded,
            stats: CacheStats {
                loads: num_blocks as u64,
                ..CacheStats::default()
            },
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_resident(&self, block: BlockId) -> bool {
        match &self.residency {
            Residency::Preloaded => block < self.num_blocks,
            Residency::Lazy { lru, .. } => lru.contains(&block),
        }
    }

    /// Raw bytes of `block`, loading it if necessary.
    pub fn get_block(&mut self, block: BlockId) -> Result<&[u8]> {
        if block >= self.num_blocks {
            return Err(Error::InvalidInput(format!("block {} out of range, file has {} blocks", block, self.num_blocks)));
        }

        let slot = match &mut self.residency {
            Residency::Preloaded => {
                self.stats.hits += 1;
                block as usize
            }
            Residency::Lazy { lru, capacity, free } => {
                if let Some(&slot) = lru.get(&block) {
                    self.stats.hits += 1;
                    tracing::trace!(block, slot, "block cache hit");
                    slot
                } else {
                    let allocated = self.data.len() / self.block_size;
                    let slot = if let Some(slot) = free.pop() {
                        slot
                    } else if allocated < *capacity {
                        self.data.resize((allocated + 1) * self.block_size, 0);
                        allocated
                    } else {
                        let (evicted, slot) = lru
                            .pop_lru()
                            .ok_or_else(|| Error::InvalidInput("block cache has no room for a single block".to_string()))?;
                        self.stats.evictions += 1;
                        tracing::trace!(evicted, slot, "evicted block");
                        slot
                    };
                    let range = slot * self.block_size..(slot + 1) * self.block_size;
                    let loaded = self
                        .reader
                        .seek(SeekFrom::Start(self.offset + block as u64 * self.block_size as u64))
                        .and_then(|_| self.reader.read_exact(&mut self.data[range]));
                    if let Err(err) = loaded {
                        // the slot holds garbage now
                        free.push(slot);
                        return Err(err.into());
                    }
                    lru.push(block, slot);
                    self.stats.loads += 1;
                    tracing::trace!(block, slot, "loaded block");
                    slot
                }
            }
        };

        Ok(&self.data[slot * self.block_size..(slot + 1) * self.block_size])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Reader which counts the bytes read through it.
    pub(crate) struct CountingReader<R> {
        pub inner: R,
        pub bytes_read: Arc<AtomicUsize>,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let read = self.inner.read(buf)?;
            self.bytes_read.fetch_add(read, Ordering::SeqCst);
            Ok(read)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    const BLOCK_SIZE: usize = 16;

    // block i is filled with byte i, behind a 16 byte prefix
    fn backing(num_blocks: u8) -> Cursor<Vec<u8>> {
        let mut data = vec![0xFF; BLOCK_SIZE];
        for block in 0..num_blocks {
            data.extend(std::iter::repeat(block).take(BLOCK_SIZE));
        }
        Cursor::new(data)
    }

    #[test]
    fn round_robin_within_capacity_loads_each_block_once() {
        let k = 4;
        let mut cache = BlockCache::lazy(backing(8), BLOCK_SIZE as u64, BLOCK_SIZE, 8, k).unwrap();
        for _ in 0..2 {
            for block in 0..k as u32 {
                assert!(cache.get_block(block).unwrap().iter().all(|&byte| byte == block as u8));
            }
        }
        assert_eq!(cache.stats(), CacheStats { hits: 4, loads: 4, evictions: 0 });
    }

    #[test]
    fn one_block_too_many_evicts_the_least_recently_used() {
        let k = 3;
        let mut cache = BlockCache::lazy(backing(8), BLOCK_SIZE as u64, BLOCK_SIZE, 8, k).unwrap();
        for block in 0..k as u32 {
            cache.get_block(block).unwrap();
        }
        // touch 0 again, so 1 is least recently used
        cache.get_block(0).unwrap();
        assert_eq!(cache.get_block(5).unwrap()[0], 5);

        assert_eq!(cache.stats().evictions, 1);
        assert!(!cache.is_resident(1));
        assert!(cache.is_resident(0));
        assert!(cache.is_resident(2));
        assert!(cache.is_resident(5));
        assert_eq!(cache.get_block(2).unwrap()[BLOCK_SIZE - 1], 2);
        assert_eq!(cache.stats().loads, 4);
    }

    #[test]
    fn preload_reads_everything_up_front() {
        let bytes_read = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: backing(5),
            bytes_read: bytes_read.clone(),
        };
        let mut cache = BlockCache::preload(reader, BLOCK_SIZE as u64, BLOCK_SIZE, 5).unwrap();
        assert_eq!(bytes_read.load(Ordering::SeqCst), 5 * BLOCK_SIZE);
        for block in (0..5).rev() {
            assert_eq!(cache.get_block(block).unwrap()[3], block as u8);
        }
        assert_eq!(bytes_read.load(Ordering::SeqCst), 5 * BLOCK_SIZE);
        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.get_block(5).is_err());
    }

    #[test]
    fn truncated_backing_file_fails_the_access() {
        let mut cache = BlockCache::lazy(backing(2), BLOCK_SIZE as u64, BLOCK_SIZE, 3, 2).unwrap();
        assert!(cache.get_block(1).is_ok());
        assert!(cache.get_block(0).is_ok());
        assert!(matches!(cache.get_block(2), Err(Error::Io(_))));
        // the failed load must not clobber the blocks still cached
        assert_eq!(cache.get_block(1).unwrap()[0], 1);
        assert_eq!(cache.get_block(0).unwrap()[0], 0);
    }
}
