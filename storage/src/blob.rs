// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A blob: one shard of the key space. Owns two alternating on-disk
//! generations (`BlobStore`s), a sorted in-memory write cache, a pending
//! removal set, and the sorted/unsorted in-memory chunk sets rebuilt
//! from whichever generation is current on disk.
//!
//! Two locks guard this state, taken in a fixed order everywhere:
//! `write_lock` before `disk_lock`. See `read()` and `write_cache()` for
//! the exact handoff a reader and the flush worker use to avoid racing
//! each other.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error, trace};
use smack_utils::exec::hex_prefix;

use crate::blob_store::{BlobStore, ChunkLookup};
use crate::chunk::Chunk;
use crate::compress::Algorithm;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::record::CacheEntry;

/// Full compaction kicks in once the unsorted overflow grows past this
/// many chunks; left unchecked it would make every read scan an
/// unbounded number of unsorted chunks.
const UNSORTED_THRESHOLD: usize = 50;

/// How often `store_chunk` samples a record into a chunk's sparse read
/// cache, expressed as "every Nth record".
const SAMPLE_STRIDE: usize = 16;

struct WriteState {
    write_cache: BTreeMap<Key, CacheEntry>,
    remove_cache: BTreeSet<Key>,
    split_target: Option<Arc<Blob>>,
}

struct DiskState {
    sorted_chunks: BTreeMap<Key, Arc<Chunk>>,
    unsorted_chunks: Vec<Arc<Chunk>>,
    chunk_idx: u8,
    stores: [BlobStore; 2],
    split_target: Option<Arc<Blob>>,
}

pub struct BlobConfig {
    pub bloom_bits: usize,
    pub max_cache_size: usize,
    pub codec: Algorithm,
    pub split_min_bytes: u64,
}

pub struct Blob {
    prefix: PathBuf,
    pub range_start: Key,
    config: BlobConfig,
    write_state: Mutex<WriteState>,
    disk_state: Mutex<DiskState>,
    last_median_key: RwLock<Option<Key>>,
    want_rcache: std::sync::atomic::AtomicBool,
    want_resort: std::sync::atomic::AtomicBool,
    next_ts: AtomicU64,
    cache_len_hint: AtomicU32,
}

impl Blob {
    /// Open (or create) a blob rooted at `dir/smack.<n>`, probing both
    /// generations and recovering whichever is authoritative.
    pub fn open<P: AsRef<Path>>(dir: P, n: u64, config: BlobConfig) -> Result<Arc<Blob>> {
        let prefix = dir.as_ref().join(format!("smack.{}", n));
        let mut store0 = BlobStore::open(format!("{}.0", prefix.display()))?;
        let mut store1 = BlobStore::open(format!("{}.1", prefix.display()))?;

        let chunk_idx = Self::pick_current_generation(&store0, &store1)?;
        let (sorted_chunks, unsorted_chunks) = if chunk_idx == 0 {
            store0.read_index(SAMPLE_STRIDE, config.codec)?
        } else {
            store1.read_index(SAMPLE_STRIDE, config.codec)?
        };

        let range_start = sorted_chunks
            .values()
            .next()
            .map(|c| c.ctl.start)
            .unwrap_or(Key::MIN);

        debug!(
            "opened blob {} (generation {}, {} sorted chunks, {} unsorted)",
            prefix.display(),
            chunk_idx,
            sorted_chunks.len(),
            unsorted_chunks.len()
        );

        Ok(Arc::new(Blob {
            prefix,
            range_start,
            config,
            write_state: Mutex::new(WriteState {
                write_cache: BTreeMap::new(),
                remove_cache: BTreeSet::new(),
                split_target: None,
            }),
            disk_state: Mutex::new(DiskState {
                sorted_chunks,
                unsorted_chunks,
                chunk_idx,
                stores: [store0, store1],
                split_target: None,
            }),
            last_median_key: RwLock::new(None),
            want_rcache: std::sync::atomic::AtomicBool::new(false),
            want_resort: std::sync::atomic::AtomicBool::new(false),
            next_ts: AtomicU64::new(1),
            cache_len_hint: AtomicU32::new(0),
        }))
    }

    /// Create a brand new, empty blob (used when the router splits).
    pub fn create<P: AsRef<Path>>(dir: P, n: u64, range_start: Key, config: BlobConfig) -> Result<Arc<Blob>> {
        let prefix = dir.as_ref().join(format!("smack.{}", n));
        let store0 = BlobStore::open(format!("{}.0", prefix.display()))?;
        let store1 = BlobStore::open(format!("{}.1", prefix.display()))?;
        Ok(Arc::new(Blob {
            prefix,
            range_start,
            config,
            write_state: Mutex::new(WriteState {
                write_cache: BTreeMap::new(),
                remove_cache: BTreeSet::new(),
                split_target: None,
            }),
            disk_state: Mutex::new(DiskState {
                sorted_chunks: BTreeMap::new(),
                unsorted_chunks: Vec::new(),
                chunk_idx: 0,
                stores: [store0, store1],
                split_target: None,
            }),
            last_median_key: RwLock::new(None),
            want_rcache: std::sync::atomic::AtomicBool::new(false),
            want_resort: std::sync::atomic::AtomicBool::new(false),
            next_ts: AtomicU64::new(1),
            cache_len_hint: AtomicU32::new(0),
        }))
    }

    fn pick_current_generation(store0: &BlobStore, store1: &BlobStore) -> Result<u8> {
        let size0 = store0.size()?;
        let size1 = store1.size()?;
        if size0 == 0 && size1 == 0 {
            return Ok(0);
        }
        let mtime0 = store0.mtime().ok();
        let mtime1 = store1.mtime().ok();
        match (mtime0, mtime1) {
            (Some(m0), Some(m1)) if m0 != m1 => Ok(if m0 > m1 { 0 } else { 1 }),
            _ => Ok(if size0 >= size1 { 0 } else { 1 }),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.prefix.clone()
    }

    /// The `.data` file of whichever generation is currently live. This
    /// is what callers actually want from the public `lookup` operation:
    /// the prefix alone doesn't name a real file on disk.
    pub fn active_data_path(&self) -> PathBuf {
        let disk = self.disk_state.lock().unwrap();
        disk.stores[disk.chunk_idx as usize].data_path().to_path_buf()
    }

    fn next_timestamp(&self) -> u64 {
        self.next_ts.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or overwrite `key`. Returns `true` when the write cache has
    /// crossed `max_cache_size`, signaling the router to schedule a
    /// flush.
    pub fn write(&self, key: Key, data: Vec<u8>) -> bool {
        trace!("key {}: write cache insert", hex_prefix(key.as_bytes(), 8));
        let ts = self.next_timestamp();
        let mut state = self.write_state.lock().unwrap();
        state.remove_cache.remove(&key);
        state.write_cache.insert(key, CacheEntry::new(ts, data));
        let len = state.write_cache.len();
        self.cache_len_hint.store(len as u32, Ordering::Relaxed);
        len >= self.config.max_cache_size
    }

    /// Insert `key` into the pending-removal set. Returns `true` once the
    /// removal set itself has grown past `max_cache_size`, so that
    /// removals also get flushed promptly instead of growing unbounded.
    pub fn remove(&self, key: Key) -> bool {
        trace!("key {}: marked for removal", hex_prefix(key.as_bytes(), 8));
        let mut state = self.write_state.lock().unwrap();
        state.write_cache.remove(&key);
        state.remove_cache.insert(key);
        state.remove_cache.len() > self.config.max_cache_size
    }

    /// Look up `key`. See the module doc for the locking discipline this
    /// implements.
    pub fn read(&self, key: &Key) -> Result<Vec<u8>> {
        let write_guard = self.write_state.lock().unwrap();
        if write_guard.remove_cache.contains(key) {
            return Err(Error::NotFound);
        }
        if let Some(entry) = write_guard.write_cache.get(key) {
            return Ok(entry.data.clone());
        }

        // Acquire disk_lock before releasing write_lock: this is the
        // handoff that keeps a concurrent flush from moving write_cache
        // into a chunk in the gap between the checks above and the disk
        // lookup below.
        let disk_guard = self.disk_state.lock().unwrap();
        drop(write_guard);

        if let Some((_, chunk)) = disk_guard
            .sorted_chunks
            .range(..=*key)
            .next_back()
        {
            match self.try_chunk(&disk_guard, chunk, key)? {
                Some(v) => return Ok(v),
                None => {}
            }
            if *key > chunk.ctl.end {
                if let Some((_, next_chunk)) = disk_guard
                    .sorted_chunks
                    .range((std::ops::Bound::Excluded(chunk.ctl.start), std::ops::Bound::Unbounded))
                    .next()
                {
                    if let Some(v) = self.try_chunk(&disk_guard, next_chunk, key)? {
                        return Ok(v);
                    }
                }
            }
        }

        for chunk in disk_guard.unsorted_chunks.iter().rev() {
            if chunk.ctl.may_contain_range(key) {
                if let Some(v) = self.try_chunk(&disk_guard, chunk, key)? {
                    return Ok(v);
                }
            }
        }

        Err(Error::NotFound)
    }

    /// Resolve one chunk's lookup: `Ok(Some(v))` is a hit, `Ok(None)` an
    /// ordinary miss to keep searching.
    fn try_chunk(&self, disk: &DiskState, chunk: &Chunk, key: &Key) -> Result<Option<Vec<u8>>> {
        let store = &disk.stores[disk.chunk_idx as usize];
        match store.chunk_read(chunk, self.config.codec, key) {
            Ok(ChunkLookup::Found(v)) => Ok(Some(v)),
            Ok(ChunkLookup::Miss) => Ok(None),
            Err(e) => {
                error!(
                    "{}: key {}: chunk read failed at offset {}: {}",
                    store.data_path().display(),
                    hex_prefix(key.as_bytes(), 8),
                    chunk.ctl.data_offset,
                    e
                );
                Err(e)
            }
        }
    }

    pub fn set_split_dst(&self, target: Arc<Blob>) {
        let mut disk = self.disk_state.lock().unwrap();
        disk.split_target = Some(target.clone());
        let mut write = self.write_state.lock().unwrap();
        write.split_target = Some(target);
    }

    pub fn has_split_target(&self) -> bool {
        self.disk_state.lock().unwrap().split_target.is_some()
    }

    pub fn last_median_key(&self) -> Option<Key> {
        *self.last_median_key.read().unwrap()
    }

    pub fn disk_size(&self) -> Result<u64> {
        let disk = self.disk_state.lock().unwrap();
        disk.stores[disk.chunk_idx as usize].size()
    }

    pub fn request_rcache_reload(&self) {
        self.want_rcache.store(true, Ordering::Relaxed);
    }

    pub fn request_resort(&self) {
        self.want_resort.store(true, Ordering::Relaxed);
    }

    /// One unit of background work, called by a flush worker. Returns
    /// `true` if the write cache is already back over threshold and the
    /// worker should call this again immediately.
    pub fn write_cache(&self) -> Result<bool> {
        let mut tmp = {
            let mut write = self.write_state.lock().unwrap();
            std::mem::take(&mut write.write_cache)
        };

        let mut disk = self.disk_state.lock().unwrap();

        let unsorted_len = disk.unsorted_chunks.len();
        let needs_full_compaction = unsorted_len > UNSORTED_THRESHOLD
            || disk.split_target.is_some()
            || self.want_resort.load(Ordering::Relaxed);

        if needs_full_compaction {
            self.full_compaction(&mut disk, tmp)?;
        } else if self.want_rcache.swap(false, Ordering::Relaxed) {
            self.reload_rcaches(&mut disk)?;
            self.requeue_leftovers(&mut tmp);
        } else if !tmp.is_empty() {
            self.write_cache_to_chunks(&mut disk, tmp)?;
        }

        drop(disk);
        let pending = self.write_state.lock().unwrap().write_cache.len();
        Ok(pending >= self.config.max_cache_size)
    }

    fn requeue_leftovers(&self, tmp: &mut BTreeMap<Key, CacheEntry>) {
        if tmp.is_empty() {
            return;
        }
        let mut write = self.write_state.lock().unwrap();
        for (k, v) in std::mem::take(tmp) {
            write.write_cache.entry(k).or_insert(v);
        }
    }

    /// Flush `tmp` as one or more *unsorted* chunks, sized at
    /// `max_cache_size` (the last chunk may run up to 1.5x that if the
    /// remainder is small, to avoid emitting a tiny trailing chunk).
    fn write_cache_to_chunks(&self, disk: &mut DiskState, mut tmp: BTreeMap<Key, CacheEntry>) -> Result<()> {
        if tmp.is_empty() {
            return Ok(());
        }

        let chunk_size = self.config.max_cache_size.max(1);
        while !tmp.is_empty() {
            let take = if tmp.len() <= chunk_size * 3 / 2 {
                tmp.len()
            } else {
                chunk_size
            };
            let store = &mut disk.stores[disk.chunk_idx as usize];
            let chunk = store.store_chunk(
                &mut tmp,
                take,
                SAMPLE_STRIDE,
                self.config.bloom_bits,
                self.config.codec,
            )?;
            self.record_median(&chunk);
            disk.unsorted_chunks.push(chunk);
        }
        Ok(())
    }

    fn record_median(&self, chunk: &Chunk) {
        if let Some(mid) = chunk.median_key {
            *self.last_median_key.write().unwrap() = Some(mid);
        }
    }

    /// Merge every unsorted chunk (newest first) and every sorted chunk
    /// into one ordered map, flip generations, optionally peel off a
    /// split range, and re-emit the survivors as fresh sorted chunks.
    fn full_compaction(&self, disk: &mut DiskState, tmp: BTreeMap<Key, CacheEntry>) -> Result<()> {
        trace!("blob {} starting full compaction", self.prefix.display());
        let old_idx = disk.chunk_idx as usize;
        let mut cache: BTreeMap<Key, CacheEntry> = BTreeMap::new();

        // unsorted_chunks is stored oldest-first (flush order); insert
        // oldest first so a later (newer) insert for the same key wins.
        let unsorted = std::mem::take(&mut disk.unsorted_chunks);
        {
            let store = &disk.stores[old_idx];
            for chunk in unsorted.iter() {
                store.read_chunk(chunk, self.config.codec, &mut cache)?;
            }
        }

        let sorted = std::mem::take(&mut disk.sorted_chunks);
        {
            let store = &disk.stores[old_idx];
            for (_, chunk) in sorted.iter() {
                store.read_chunk(chunk, self.config.codec, &mut cache)?;
            }
        }

        // The write cache captured at the top of write_cache() is always
        // the newest data of all.
        for (k, v) in tmp {
            cache.insert(k, v);
        }

        disk.stores[old_idx].drop_page_cache();

        let new_idx = 1 - old_idx;
        disk.stores[new_idx].truncate()?;
        disk.chunk_idx = new_idx as u8;

        if let Some(target) = disk.split_target.clone() {
            let start = target.range_start;
            let split_keys: Vec<Key> = cache
                .range((std::ops::Bound::Included(start), std::ops::Bound::Unbounded))
                .map(|(k, _)| *k)
                .collect();
            for k in split_keys {
                if let Some(entry) = cache.remove(&k) {
                    target.write(k, entry.data);
                }
            }
        }

        let mut live = cache;
        let chunk_size = self.config.max_cache_size.max(1);
        while !live.is_empty() {
            let take = live.len().min(chunk_size);
            let store = &mut disk.stores[new_idx];
            let chunk = store.store_chunk(
                &mut live,
                take,
                SAMPLE_STRIDE,
                self.config.bloom_bits,
                self.config.codec,
            )?;
            self.record_median(&chunk);
            disk.sorted_chunks.insert(chunk.ctl.start, chunk);
        }

        // Split finalization re-acquires write_lock while disk_lock is
        // still held, the one deliberate exception to the usual
        // write-before-disk order: it only runs inside compaction, on
        // the same blob whose disk_lock this thread already holds, to
        // sweep up write_cache entries that arrived mid-compaction.
        if let Some(target) = disk.split_target.take() {
            let mut write = self.write_state.lock().unwrap();
            let start = target.range_start;
            let stragglers: Vec<Key> = write
                .write_cache
                .range((std::ops::Bound::Included(start), std::ops::Bound::Unbounded))
                .map(|(k, _)| *k)
                .collect();
            for k in stragglers {
                if let Some(entry) = write.write_cache.remove(&k) {
                    target.write(k, entry.data);
                }
            }
            write.split_target = None;
        }

        debug!(
            "blob {} compaction done: {} sorted chunks in generation {}",
            self.prefix.display(),
            disk.sorted_chunks.len(),
            new_idx
        );
        Ok(())
    }

    fn reload_rcaches(&self, disk: &mut DiskState) -> Result<()> {
        let codec = self.config.codec;
        let store = &disk.stores[disk.chunk_idx as usize];
        for chunk in disk.sorted_chunks.values() {
            chunk.clear_rcache();
            store.populate_rcache(chunk, SAMPLE_STRIDE, codec)?;
        }
        for chunk in disk.unsorted_chunks.iter() {
            chunk.clear_rcache();
            store.populate_rcache(chunk, SAMPLE_STRIDE, codec)?;
        }
        debug!("blob {} reloaded rcaches", self.prefix.display());
        Ok(())
    }
}
