// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! One generation's file pair: `<prefix>.data` (concatenated compressed
//! chunk streams) and `<prefix>.chunk` (header + `(chunk_ctl, bloom)`
//! records). `Blob` owns two of these and alternates between them across
//! compactions.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::uio;

use crate::bloom::Bloom;
use crate::chunk::Chunk;
use crate::compress::{self, Algorithm};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::record::{CacheEntry, ChunkControl, ChunkHeader, IndexRecord, INDEX_RECORD_SIZE};

/// Outcome of a point lookup against a single chunk's data stream.
pub enum ChunkLookup {
    /// The key was found with a live value.
    Found(Vec<u8>),
    /// The key was not present in this chunk at all; keep looking.
    Miss,
}

pub struct BlobStore {
    data_path: PathBuf,
    chunk_path: PathBuf,
    data_file: File,
    chunk_file: File,
}

impl BlobStore {
    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let prefix = prefix.as_ref();
        let data_path = prefix.with_extension("data");
        let chunk_path = prefix.with_extension("chunk");
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;
        let chunk_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&chunk_path)?;
        Ok(BlobStore {
            data_path,
            chunk_path,
            data_file,
            chunk_file,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.data_file.metadata()?.len())
    }

    pub fn mtime(&self) -> Result<std::time::SystemTime> {
        Ok(self.data_file.metadata()?.modified()?)
    }

    /// Append at most `n` of the smallest entries of `cache` to `.data`,
    /// encoded through a fresh codec instance, and record a matching
    /// control entry in `.chunk`. Consumed entries are removed from
    /// `cache`. `cache` must be non-empty.
    pub fn store_chunk(
        &mut self,
        cache: &mut std::collections::BTreeMap<Key, CacheEntry>,
        n: usize,
        sample_stride: usize,
        bloom_bits: usize,
        codec: Algorithm,
    ) -> Result<Arc<Chunk>> {
        let take_n = n.min(cache.len());
        if take_n == 0 {
            return Err(Error::out_of_range("store_chunk called on empty cache"));
        }
        let keys: Vec<Key> = cache.keys().take(take_n).cloned().collect();

        let mut encoder = compress::new_encoder(codec);
        let mut bloom = Bloom::new(bloom_bits);
        let mut samples: Vec<(Key, u64, IndexRecord)> = Vec::new();
        let mut uncompressed_offset: u64 = 0;
        let stride = sample_stride.max(1);

        for (i, key) in keys.iter().enumerate() {
            let entry = cache.get(key).expect("key drawn from cache");
            let rec = IndexRecord::new(*key, entry.ts, entry.data.len() as u64);

            let mut hdr_buf = Vec::with_capacity(INDEX_RECORD_SIZE);
            rec.encode(&mut hdr_buf)?;
            encoder
                .write_all(&hdr_buf)
                .map_err(|e| Error::codec(e.to_string()))?;
            encoder
                .write_all(&entry.data)
                .map_err(|e| Error::codec(e.to_string()))?;

            bloom.add(key.as_bytes());
            if i % stride == 0 {
                samples.push((*key, uncompressed_offset, rec));
            }
            uncompressed_offset += INDEX_RECORD_SIZE as u64 + rec.data_size;
        }

        let compressed = encoder
            .finish()
            .map_err(|e| Error::codec(format!("finish: {}", e)))?;

        let data_offset = self.size()?;
        self.pwrite_all(&compressed, data_offset)?;

        let start = keys[0];
        let end = keys[take_n - 1];
        let median_key = keys.get(take_n / 2).copied();
        let ctl = ChunkControl {
            start,
            end,
            data_offset,
            compressed_data_size: compressed.len() as u64,
            uncompressed_data_size: uncompressed_offset,
            num: take_n as u32,
            bloom_size: bloom.byte_size() as u32,
        };
        self.append_chunk_meta(&ctl, &bloom)?;

        for key in &keys {
            cache.remove(key);
        }

        let chunk = Chunk::new(ctl, bloom).with_median(median_key);
        for (key, offset, rec) in samples {
            chunk.rcache_add(key, offset, rec);
        }
        Ok(Arc::new(chunk))
    }

    fn append_chunk_meta(&mut self, ctl: &ChunkControl, bloom: &Bloom) -> Result<()> {
        if self.chunk_file.metadata()?.len() == 0 {
            let hdr = ChunkHeader::new(current_unix_time());
            let mut buf = Vec::new();
            hdr.encode(&mut buf)?;
            self.chunk_file.seek(SeekFrom::Start(0))?;
            self.chunk_file.write_all(&buf)?;
        }
        let mut buf = Vec::new();
        ctl.encode(&mut buf)?;
        buf.extend_from_slice(bloom.data());
        self.chunk_file.seek(SeekFrom::End(0))?;
        self.chunk_file.write_all(&buf)?;
        self.chunk_file.flush()?;
        Ok(())
    }

    /// Decompress `chunk`'s whole stream into `out_cache` (used by startup
    /// recovery and full compaction to merge every chunk's live entries
    /// into one ordered map).
    pub fn read_chunk(
        &self,
        chunk: &Chunk,
        codec: Algorithm,
        out_cache: &mut std::collections::BTreeMap<Key, CacheEntry>,
    ) -> Result<()> {
        self.decode_records_with_codec(&chunk.ctl, codec, |_i, key, rec, _offset, payload| {
            out_cache.insert(key, CacheEntry::new(rec.ts, payload));
            Ok(())
        })
    }

    /// Point lookup within a single chunk's stream, bounded by the
    /// chunk's bloom filter and sparse read cache.
    pub fn chunk_read(&self, chunk: &Chunk, codec: Algorithm, key: &Key) -> Result<ChunkLookup> {
        if !chunk.bloom.check(key.as_bytes()) {
            return Ok(ChunkLookup::Miss);
        }
        let bound = chunk.rcache_find(key);
        let mut result = ChunkLookup::Miss;
        let mut stop = false;
        let outcome = self.decode_records_with_codec(&chunk.ctl, codec, |_i, rec_key, _rec, offset, payload| {
            if stop {
                return Ok(());
            }
            if let Some(bound) = bound {
                if offset > bound {
                    stop = true;
                    return Ok(());
                }
            }
            if rec_key < *key {
                return Ok(());
            }
            if rec_key > *key {
                stop = true;
                return Ok(());
            }
            result = ChunkLookup::Found(payload);
            stop = true;
            Ok(())
        });
        outcome?;
        Ok(result)
    }

    /// Read and validate the chunk-file header, then reconstruct every
    /// in-memory chunk, partitioning into the ordered sorted set and the
    /// unsorted overflow per the chunk-placement rule.
    pub fn read_index(
        &mut self,
        sample_stride: usize,
        codec: Algorithm,
    ) -> Result<(
        std::collections::BTreeMap<Key, Arc<Chunk>>,
        Vec<Arc<Chunk>>,
    )> {
        let mut sorted = std::collections::BTreeMap::new();
        let mut unsorted = Vec::new();

        let len = self.chunk_file.metadata()?.len();
        if len == 0 {
            return Ok((sorted, unsorted));
        }

        self.chunk_file.seek(SeekFrom::Start(0))?;
        let mut all = Vec::new();
        self.chunk_file.read_to_end(&mut all)?;
        let mut cur = Cursor::new(all);
        ChunkHeader::decode(&mut cur)?;

        let mut last_sorted_end: Option<Key> = None;
        loop {
            let pos = cur.position();
            let remaining = cur.get_ref().len() as u64 - pos;
            if remaining == 0 {
                break;
            }
            if remaining < crate::record::CHUNK_CONTROL_SIZE as u64 {
                // trailing partial control record: tolerated, discard.
                break;
            }
            let ctl = match ChunkControl::decode(&mut cur) {
                Ok(ctl) => ctl,
                Err(_) => break,
            };
            let bloom_size = ctl.bloom_size as usize;
            if (cur.get_ref().len() as u64 - cur.position()) < bloom_size as u64 {
                break;
            }
            let mut bloom_bytes = vec![0u8; bloom_size];
            cur.read_exact(&mut bloom_bytes)?;

            let bloom = Bloom::from_bytes(&bloom_bytes);
            let chunk = Arc::new(Chunk::new(ctl.clone(), bloom));
            self.populate_rcache(&chunk, sample_stride, codec)?;

            let placed_sorted = match &last_sorted_end {
                Some(end) => chunk.ctl.start >= *end,
                None => true,
            };
            if placed_sorted {
                last_sorted_end = Some(chunk.ctl.end);
                sorted.insert(chunk.ctl.start, chunk);
            } else {
                unsorted.push(chunk);
            }
        }

        Ok((sorted, unsorted))
    }

    /// (Re)populate `chunk`'s sparse read cache by decoding its stream
    /// and sampling every `sample_stride`-th record. Used both by
    /// `read_index` on startup and by a blob's explicit rcache reload
    /// request.
    pub fn populate_rcache(&self, chunk: &Chunk, sample_stride: usize, codec: Algorithm) -> Result<()> {
        let stride = sample_stride.max(1);
        let mut i = 0usize;
        let result = self.decode_records_with_codec(&chunk.ctl, codec, |idx, key, rec, offset, _payload| {
            if idx % stride == 0 {
                chunk.rcache_add(key, offset, rec);
            }
            i = idx;
            Ok(())
        });
        // A codec error partway through rehydration only costs us a
        // shorter rcache; tolerate it the same way a truncated trailing
        // record is tolerated elsewhere.
        if let Err(Error::CodecError(_)) = result {
            return Ok(());
        }
        result
    }

    fn decode_records_with_codec<F>(&self, ctl: &ChunkControl, codec: Algorithm, mut visit: F) -> Result<()>
    where
        F: FnMut(usize, Key, IndexRecord, u64, Vec<u8>) -> Result<()>,
    {
        let mut compressed = vec![0u8; ctl.compressed_data_size as usize];
        self.pread_exact(&mut compressed, ctl.data_offset)?;
        let mut decoder = compress::new_decoder(codec, compressed)?;

        let mut offset: u64 = 0;
        for i in 0..ctl.num as usize {
            let mut hdr_buf = [0u8; INDEX_RECORD_SIZE];
            if decoder.read_exact(&mut hdr_buf).is_err() {
                // tolerated: a truncated trailing record from a partial flush
                break;
            }
            let rec = IndexRecord::decode(&mut Cursor::new(&hdr_buf[..]))?;
            let mut payload = vec![0u8; rec.data_size as usize];
            if !payload.is_empty() && decoder.read_exact(&mut payload).is_err() {
                break;
            }
            visit(i, rec.id, rec, offset, payload)?;
            offset += INDEX_RECORD_SIZE as u64 + rec.data_size;
        }
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.data_file.set_len(0)?;
        self.data_file.seek(SeekFrom::Start(0))?;
        self.chunk_file.set_len(0)?;
        self.chunk_file.seek(SeekFrom::Start(0))?;
        advise_drop_cache(&self.data_file);
        Ok(())
    }

    pub fn drop_page_cache(&self) {
        advise_drop_cache(&self.data_file);
    }

    fn pwrite_all(&self, mut buf: &[u8], mut offset: u64) -> Result<()> {
        let fd = self.data_file.as_raw_fd();
        while !buf.is_empty() {
            match uio::pwrite(fd, buf, offset as i64) {
                Ok(0) => {
                    return Err(Error::IoError(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "pwrite returned 0",
                    )))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(nix::Error::Sys(Errno::EINTR)) => continue,
                Err(e) => return Err(Error::IoError(nix_to_io_error(e))),
            }
        }
        Ok(())
    }

    fn pread_exact(&self, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
        let fd = self.data_file.as_raw_fd();
        while !buf.is_empty() {
            match uio::pread(fd, buf, offset as i64) {
                Ok(0) => {
                    return Err(Error::corrupt(
                        "chunk control record points past end of data file",
                    ))
                }
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(nix::Error::Sys(Errno::EINTR)) => continue,
                Err(e) => return Err(Error::IoError(nix_to_io_error(e))),
            }
        }
        Ok(())
    }
}

fn nix_to_io_error(e: nix::Error) -> std::io::Error {
    match e {
        nix::Error::Sys(errno) => std::io::Error::from_raw_os_error(errno as i32),
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}

fn advise_drop_cache(file: &File) {
    let fd = file.as_raw_fd();
    unsafe {
        libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_DONTNEED);
    }
}

fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_SIZE;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn key(b: u8) -> Key {
        Key([b; KEY_SIZE])
    }

    #[test]
    fn test_store_and_read_chunk_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = BlobStore::open(dir.path().join("smack.0.0")).unwrap();

        let mut cache = BTreeMap::new();
        cache.insert(key(1), CacheEntry::new(1, b"one".to_vec()));
        cache.insert(key(2), CacheEntry::new(2, b"two".to_vec()));

        let chunk = store
            .store_chunk(&mut cache, 2, 1, 1024, Algorithm::Zlib)
            .unwrap();
        assert!(cache.is_empty());
        assert_eq!(chunk.ctl.num, 2);
        assert_eq!(chunk.ctl.start, key(1));
        assert_eq!(chunk.ctl.end, key(2));

        let mut out = BTreeMap::new();
        store.read_chunk(&chunk, Algorithm::Zlib, &mut out).unwrap();
        assert_eq!(out.get(&key(1)).unwrap().data, b"one");
        assert_eq!(out.get(&key(2)).unwrap().data, b"two");
    }

    #[test]
    fn test_chunk_read_point_lookup() {
        let dir = tempdir().unwrap();
        let mut store = BlobStore::open(dir.path().join("smack.0.0")).unwrap();

        let mut cache = BTreeMap::new();
        for i in 1u8..=5 {
            cache.insert(key(i), CacheEntry::new(i as u64, vec![i; 16]));
        }
        let chunk = store
            .store_chunk(&mut cache, 5, 2, 2048, Algorithm::Lz4Fast)
            .unwrap();

        match store.chunk_read(&chunk, Algorithm::Lz4Fast, &key(3)).unwrap() {
            ChunkLookup::Found(data) => assert_eq!(data, vec![3u8; 16]),
            _ => panic!("expected a hit"),
        }
        match store.chunk_read(&chunk, Algorithm::Lz4Fast, &key(9)).unwrap() {
            ChunkLookup::Miss => {}
            _ => panic!("expected a miss"),
        }
    }

    #[test]
    fn test_read_index_partitions_sorted_and_unsorted() {
        let dir = tempdir().unwrap();
        let mut store = BlobStore::open(dir.path().join("smack.0.0")).unwrap();

        let mut cache1 = BTreeMap::new();
        cache1.insert(key(1), CacheEntry::new(1, b"a".to_vec()));
        cache1.insert(key(2), CacheEntry::new(1, b"b".to_vec()));
        store
            .store_chunk(&mut cache1, 2, 1, 256, Algorithm::Bzip2)
            .unwrap();

        // overlaps chunk 1's range: must land in the unsorted set
        let mut cache2 = BTreeMap::new();
        cache2.insert(key(1), CacheEntry::new(2, b"a2".to_vec()));
        store
            .store_chunk(&mut cache2, 1, 1, 256, Algorithm::Bzip2)
            .unwrap();

        let (sorted, unsorted) = store.read_index(1, Algorithm::Bzip2).unwrap();
        assert_eq!(sorted.len(), 1);
        assert_eq!(unsorted.len(), 1);
    }

    #[test]
    fn test_truncate_resets_both_files() {
        let dir = tempdir().unwrap();
        let mut store = BlobStore::open(dir.path().join("smack.0.0")).unwrap();
        let mut cache = BTreeMap::new();
        cache.insert(key(1), CacheEntry::new(1, b"x".to_vec()));
        store
            .store_chunk(&mut cache, 1, 1, 128, Algorithm::Zlib)
            .unwrap();
        assert!(store.size().unwrap() > 0);

        store.truncate().unwrap();
        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.chunk_file.metadata().unwrap().len(), 0);
    }
}
