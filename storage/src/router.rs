// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Top-level shard router: an ordered set of blobs keyed by their
//! range-start key, plus the policy for routing a write into a split
//! when a blob grows too large.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::info;

use crate::blob::{Blob, BlobConfig};
use crate::compress::Algorithm;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::worker::FlushWorkerPool;

/// A blob is offered a sibling once its current generation's data file
/// exceeds this size and no split is already in progress.
const DEFAULT_SPLIT_MIN_BYTES: u64 = 10 * 1024 * 1024;

pub struct RouterConfig {
    pub bloom_bits: usize,
    pub max_cache_size: usize,
    pub max_blob_num: usize,
    pub flush_threads: usize,
    pub codec: Algorithm,
    pub split_min_bytes: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            bloom_bits: 4096,
            max_cache_size: 10_000,
            max_blob_num: 64,
            flush_threads: 4,
            codec: Algorithm::Zlib,
            split_min_bytes: DEFAULT_SPLIT_MIN_BYTES,
        }
    }
}

/// Whether a read/remove must land on the blob whose range literally
/// starts at or before `key` (strict), or may fall back to the earliest
/// blob when `key` precedes every known range (lenient, used by write).
#[derive(Clone, Copy, PartialEq, Eq)]
enum LookupMode {
    Strict,
    Lenient,
}

pub struct ShardRouter {
    dir: PathBuf,
    config: RouterConfig,
    blobs: RwLock<BTreeMap<Key, Arc<Blob>>>,
    next_blob_id: AtomicU64,
    pool: FlushWorkerPool,
}

impl ShardRouter {
    /// Scan `dir` for existing `smack.<n>.<gen>.data` files and recover
    /// every blob found; if none exist, start with a single blob ranging
    /// from the minimum key.
    pub fn open<P: AsRef<Path>>(dir: P, config: RouterConfig) -> Result<Arc<ShardRouter>> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut ids = Self::discover_blob_ids(&dir)?;
        if ids.is_empty() {
            ids.push(0);
        }
        ids.sort_unstable();
        ids.dedup();

        let mut blobs = BTreeMap::new();
        let mut max_id = 0;
        for id in ids {
            max_id = max_id.max(id);
            let blob = Blob::open(&dir, id, config.to_blob_config())?;
            blobs.insert(blob.range_start, blob);
        }

        let router = Arc::new(ShardRouter {
            dir,
            pool: FlushWorkerPool::new(config.flush_threads),
            next_blob_id: AtomicU64::new(max_id + 1),
            config,
            blobs: RwLock::new(blobs),
        });
        router.pool.set_router(router.clone());
        info!(
            "router opened at {} with {} blob(s)",
            router.dir.display(),
            router.blobs.read().unwrap().len()
        );
        Ok(router)
    }

    fn discover_blob_ids(dir: &Path) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        if !dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // smack.<n>.<gen>.data
            if let Some(rest) = name.strip_prefix("smack.") {
                let mut parts = rest.splitn(3, '.');
                if let (Some(n), Some(_gen), Some("data")) =
                    (parts.next(), parts.next(), parts.next())
                {
                    if let Ok(n) = n.parse::<u64>() {
                        ids.push(n);
                    }
                }
            }
        }
        Ok(ids)
    }

    fn blob_lookup(&self, key: &Key, mode: LookupMode) -> Result<Arc<Blob>> {
        let blobs = self.blobs.read().unwrap();
        let (start, blob) = blobs
            .range(..=*key)
            .next_back()
            .or_else(|| blobs.iter().next())
            .ok_or_else(|| Error::out_of_range("router has no blobs"))?;
        if mode == LookupMode::Strict && *start > *key {
            return Err(Error::out_of_range(format!(
                "key precedes earliest blob range (starts at {})",
                start
            )));
        }
        Ok(blob.clone())
    }

    pub fn write(&self, key: Key, data: Vec<u8>) -> Result<()> {
        let blob = self.blob_lookup(&key, LookupMode::Lenient)?;
        let needs_flush = blob.write(key, data);
        if needs_flush {
            self.maybe_split(&blob)?;
            self.pool.enqueue(blob);
        }
        Ok(())
    }

    pub fn read(&self, key: &Key) -> Result<Vec<u8>> {
        let blob = self.blob_lookup(key, LookupMode::Strict)?;
        blob.read(key)
    }

    pub fn remove(&self, key: Key) -> Result<()> {
        let blob = self.blob_lookup(&key, LookupMode::Strict)?;
        let needs_flush = blob.remove(key);
        if needs_flush {
            self.pool.enqueue(blob);
        }
        Ok(())
    }

    pub fn lookup_path(&self, key: &Key) -> Result<PathBuf> {
        let blob = self.blob_lookup(key, LookupMode::Strict)?;
        Ok(blob.active_data_path())
    }

    /// Flush every blob and block until the worker pool has drained.
    pub fn sync(&self) -> Result<()> {
        let blobs: Vec<Arc<Blob>> = self.blobs.read().unwrap().values().cloned().collect();
        for blob in &blobs {
            self.pool.enqueue(blob.clone());
        }
        self.pool.wait_for_all();
        Ok(())
    }

    pub fn total_num(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    fn maybe_split(&self, blob: &Arc<Blob>) -> Result<()> {
        if blob.has_split_target() {
            return Ok(());
        }
        let blob_count = self.blobs.read().unwrap().len();
        if blob_count >= self.config.max_blob_num {
            return Ok(());
        }
        let size = blob.disk_size()?;
        if size < self.config.split_min_bytes {
            return Ok(());
        }
        let median = match blob.last_median_key() {
            Some(k) => k,
            None => return Ok(()),
        };

        let id = self.next_blob_id.fetch_add(1, Ordering::Relaxed);
        let sibling = Blob::create(&self.dir, id, median, self.config.to_blob_config())?;
        blob.set_split_dst(sibling.clone());
        self.blobs.write().unwrap().insert(median, sibling);
        info!(
            "router split blob starting at median key {} into new blob smack.{}",
            median, id
        );
        Ok(())
    }
}

impl RouterConfig {
    fn to_blob_config(&self) -> BlobConfig {
        BlobConfig {
            bloom_bits: self.bloom_bits,
            max_cache_size: self.max_cache_size,
            codec: self.codec,
            split_min_bytes: self.split_min_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(b: u8) -> Key {
        Key([b; crate::key::KEY_SIZE])
    }

    #[test]
    fn test_open_creates_initial_blob() {
        let dir = tempdir().unwrap();
        let cfg = RouterConfig {
            max_cache_size: 4,
            ..Default::default()
        };
        let router = ShardRouter::open(dir.path(), cfg).unwrap();
        assert_eq!(router.total_num(), 1);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let cfg = RouterConfig {
            max_cache_size: 100,
            ..Default::default()
        };
        let router = ShardRouter::open(dir.path(), cfg).unwrap();
        router.write(key(1), b"v1".to_vec()).unwrap();
        router.write(key(2), b"v2".to_vec()).unwrap();
        assert_eq!(router.read(&key(1)).unwrap(), b"v1");
        assert_eq!(router.read(&key(2)).unwrap(), b"v2");
    }

    #[test]
    fn test_remove_then_read_not_found() {
        let dir = tempdir().unwrap();
        let cfg = RouterConfig {
            max_cache_size: 100,
            ..Default::default()
        };
        let router = ShardRouter::open(dir.path(), cfg).unwrap();
        router.write(key(5), b"v".to_vec()).unwrap();
        router.remove(key(5)).unwrap();
        assert!(matches!(router.read(&key(5)), Err(Error::NotFound)));
    }

    #[test]
    fn test_sync_flushes_pending_writes_to_disk() {
        let dir = tempdir().unwrap();
        let cfg = RouterConfig {
            max_cache_size: 4,
            ..Default::default()
        };
        let router = ShardRouter::open(dir.path(), cfg).unwrap();
        for i in 0u8..5 {
            router.write(key(i), format!("value-{}", i).into_bytes()).unwrap();
        }
        router.sync().unwrap();
        assert_eq!(router.read(&key(2)).unwrap(), b"value-2");
    }
}
