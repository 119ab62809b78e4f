// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of one on-disk chunk: its control record, its
//! bloom filter, and a small sparse read cache (`rcache`) of previously
//! sampled record positions.
//!
//! A chunk's payload is a compressed stream of `(IndexRecord, data)`
//! pairs, sorted by key for sorted chunks. A point lookup always starts
//! decompression at the beginning of the chunk's stream — compressed
//! frames are not byte-addressable mid-stream — but `rcache` lets the
//! scan stop early: it gives the uncompressed-byte offset beyond which
//! `key`, if present, cannot occur.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::bloom::Bloom;
use crate::key::Key;
use crate::record::{ChunkControl, IndexRecord};

/// One remembered (key -> byte offset in the uncompressed stream) sample.
#[derive(Clone, Copy, Debug)]
pub struct RCacheEntry {
    pub offset: u64,
    pub record: IndexRecord,
}

/// Cap on the number of entries kept in a chunk's rcache. Chosen to bound
/// memory for blobs with many small chunks without needing a config knob.
const RCACHE_LIMIT: usize = 256;

pub struct Chunk {
    pub ctl: ChunkControl,
    pub bloom: Bloom,
    /// Key at record position `num/2`, captured at emission time. `None`
    /// for an empty chunk (never happens in practice since `store_chunk`
    /// refuses an empty cache).
    pub median_key: Option<Key>,
    rcache: Mutex<BTreeMap<Key, RCacheEntry>>,
}

impl Chunk {
    pub fn new(ctl: ChunkControl, bloom: Bloom) -> Self {
        Chunk {
            ctl,
            bloom,
            median_key: None,
            rcache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_median(mut self, median_key: Option<Key>) -> Self {
        self.median_key = median_key;
        self
    }

    /// Cheap pre-filter: is `key` within this chunk's key range and does
    /// the bloom filter admit it? `false` here is a hard guarantee the
    /// key is absent; `true` still requires scanning the stream.
    pub fn may_contain(&self, key: &Key) -> bool {
        self.ctl.may_contain_range(key) && self.bloom.check(key.as_bytes())
    }

    /// Remember that `record` for `key` lives at `offset` bytes into the
    /// chunk's uncompressed stream.
    pub fn rcache_add(&self, key: Key, offset: u64, record: IndexRecord) {
        let mut cache = self.rcache.lock().unwrap();
        if !cache.contains_key(&key) && cache.len() >= RCACHE_LIMIT {
            if let Some(&highest) = cache.keys().next_back() {
                cache.remove(&highest);
            }
        }
        cache.insert(key, RCacheEntry { offset, record });
    }

    /// Upper bound (in uncompressed stream bytes) beyond which a linear
    /// scan for `key` can stop: the offset of the smallest sampled key
    /// strictly greater than `key`, or the chunk's total uncompressed
    /// size if `key` is at or past every sample, or `None` if `key`
    /// falls outside `[start, end]` entirely.
    pub fn rcache_find(&self, key: &Key) -> Option<u64> {
        if !self.ctl.may_contain_range(key) {
            return None;
        }
        let cache = self.rcache.lock().unwrap();
        let bound = cache
            .range((
                std::ops::Bound::Excluded(*key),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, entry)| entry.offset)
            .unwrap_or(self.ctl.uncompressed_data_size);
        Some(bound)
    }

    pub fn clear_rcache(&self) {
        self.rcache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_SIZE;

    fn ctl(start: u8, end: u8, uncompressed_data_size: u64) -> ChunkControl {
        ChunkControl {
            start: Key([start; KEY_SIZE]),
            end: Key([end; KEY_SIZE]),
            data_offset: 0,
            compressed_data_size: 0,
            uncompressed_data_size,
            num: 0,
            bloom_size: 0,
        }
    }

    #[test]
    fn test_may_contain_range_and_bloom() {
        let mut bloom = Bloom::new(2048);
        let present = Key([0x50; KEY_SIZE]);
        bloom.add(present.as_bytes());
        let chunk = Chunk::new(ctl(0x10, 0x90, 1000), bloom);

        assert!(chunk.may_contain(&present));
        assert!(!chunk.may_contain(&Key([0x05; KEY_SIZE])));
    }

    #[test]
    fn test_rcache_find_successor_bound() {
        let chunk = Chunk::new(ctl(0, 0xff, 9000), Bloom::new(64));
        let k1 = Key([0x10; KEY_SIZE]);
        let k2 = Key([0x20; KEY_SIZE]);
        chunk.rcache_add(k1, 100, IndexRecord::new(k1, 1, 10));
        chunk.rcache_add(k2, 200, IndexRecord::new(k2, 2, 20));

        // a key between samples bounds at the next sample's offset
        let bound = chunk.rcache_find(&Key([0x15; KEY_SIZE])).unwrap();
        assert_eq!(bound, 200);

        // a key at or past the last sample bounds at the chunk's total size
        let bound = chunk.rcache_find(&Key([0x25; KEY_SIZE])).unwrap();
        assert_eq!(bound, 9000);

        // a key outside the chunk's range has no bound at all
        assert!(chunk.rcache_find(&Key([0xfe; KEY_SIZE])).is_some());
        assert!(chunk.rcache_find(&Key([0; KEY_SIZE])).is_some());
    }

    #[test]
    fn test_rcache_find_outside_range_is_none() {
        let chunk = Chunk::new(ctl(0x10, 0x90, 9000), Bloom::new(64));
        assert!(chunk.rcache_find(&Key([0x05; KEY_SIZE])).is_none());
        assert!(chunk.rcache_find(&Key([0xa0; KEY_SIZE])).is_none());
    }

    #[test]
    fn test_rcache_eviction_bounds_size() {
        let chunk = Chunk::new(ctl(0, 0xff, 1_000_000), Bloom::new(64));
        for i in 0..(RCACHE_LIMIT + 16) {
            let mut kb = [0u8; KEY_SIZE];
            kb[0..8].copy_from_slice(&(i as u64).to_be_bytes());
            let k = Key(kb);
            chunk.rcache_add(k, i as u64, IndexRecord::new(k, i as u64, 0));
        }
        assert!(chunk.rcache.lock().unwrap().len() <= RCACHE_LIMIT);
    }
}
