// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Packed little-endian on-disk record formats: the per-entry index
//! record, the per-chunk control record, and the chunk file header.
//!
//! These are hand-encoded with `byteorder` rather than `#[repr(packed)]`
//! structs: the key field is a 64-byte array with no natural alignment
//! requirement, but taking references into a packed struct is still easy
//! to get wrong across platforms, and encode/decode methods keep the
//! wire format decoupled from whatever layout the compiler would pick.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::key::{Key, KEY_SIZE};

/// Magic string stamped at the start of every chunk file.
pub const CHUNK_MAGIC: [u8; 16] = *b"SmAcK BaCkEnD\0\0\0";

/// `CHUNK_MAGIC` (16) + creation timestamp (8) + format version (4).
pub const CHUNK_HEADER_SIZE: usize = 16 + 8 + 4;

pub const CHUNK_FORMAT_VERSION: u32 = 1;

/// One entry in a chunk's serialized (index_record, payload) stream.
///
/// 64-byte id + 8-byte timestamp + 8-byte flags + 8-byte payload size = 88
/// bytes. `flags` and `data_size` are widened to 64 bits (rather than the
/// 32 bits a minimal encoding would need) to land on that 88-byte width
/// without padding. `flags` is reserved, opaque space: this engine never
/// sets a bit in it, and a removal is never written to a chunk at all —
/// `remove_cache` is consulted purely in memory (see `Blob::read`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRecord {
    pub id: Key,
    pub ts: u64,
    pub flags: u64,
    pub data_size: u64,
}

pub const INDEX_RECORD_SIZE: usize = KEY_SIZE + 8 + 8 + 8;

/// One live entry in a blob's in-memory write cache: the payload plus the
/// monotonic stamp that will be carried into its `IndexRecord` once the
/// entry is flushed to a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub ts: u64,
    pub data: Vec<u8>,
}

impl CacheEntry {
    pub fn new(ts: u64, data: Vec<u8>) -> Self {
        CacheEntry { ts, data }
    }
}

impl IndexRecord {
    pub fn new(id: Key, ts: u64, data_size: u64) -> Self {
        IndexRecord {
            id,
            ts,
            flags: 0,
            data_size,
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.id.as_bytes())?;
        w.write_u64::<LittleEndian>(self.ts)?;
        w.write_u64::<LittleEndian>(self.flags)?;
        w.write_u64::<LittleEndian>(self.data_size)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut id = [0u8; KEY_SIZE];
        r.read_exact(&mut id)?;
        let ts = r.read_u64::<LittleEndian>()?;
        let flags = r.read_u64::<LittleEndian>()?;
        let data_size = r.read_u64::<LittleEndian>()?;
        Ok(IndexRecord {
            id: Key(id),
            ts,
            flags,
            data_size,
        })
    }
}

/// Control record describing one on-disk chunk: its key range, where its
/// compressed payload lives in the data stream, and the size of its
/// trailing bloom filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkControl {
    pub start: Key,
    pub end: Key,
    pub data_offset: u64,
    pub compressed_data_size: u64,
    pub uncompressed_data_size: u64,
    pub num: u32,
    pub bloom_size: u32,
}

pub const CHUNK_CONTROL_SIZE: usize = KEY_SIZE * 2 + 8 * 3 + 4 * 2;

impl ChunkControl {
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.start.as_bytes())?;
        w.write_all(self.end.as_bytes())?;
        w.write_u64::<LittleEndian>(self.data_offset)?;
        w.write_u64::<LittleEndian>(self.compressed_data_size)?;
        w.write_u64::<LittleEndian>(self.uncompressed_data_size)?;
        w.write_u32::<LittleEndian>(self.num)?;
        w.write_u32::<LittleEndian>(self.bloom_size)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut start = [0u8; KEY_SIZE];
        let mut end = [0u8; KEY_SIZE];
        r.read_exact(&mut start)?;
        r.read_exact(&mut end)?;
        let data_offset = r.read_u64::<LittleEndian>()?;
        let compressed_data_size = r.read_u64::<LittleEndian>()?;
        let uncompressed_data_size = r.read_u64::<LittleEndian>()?;
        let num = r.read_u32::<LittleEndian>()?;
        let bloom_size = r.read_u32::<LittleEndian>()?;
        Ok(ChunkControl {
            start: Key(start),
            end: Key(end),
            data_offset,
            compressed_data_size,
            uncompressed_data_size,
            num,
            bloom_size,
        })
    }

    /// True if `key` could plausibly live in this chunk's range. Does not
    /// consult the bloom filter; callers combine this with a bloom check.
    pub fn may_contain_range(&self, key: &Key) -> bool {
        *key >= self.start && *key <= self.end
    }
}

/// Fixed header stamped at offset 0 of every chunk control file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub created_at: u64,
    pub version: u32,
}

impl ChunkHeader {
    pub fn new(created_at: u64) -> Self {
        ChunkHeader {
            created_at,
            version: CHUNK_FORMAT_VERSION,
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&CHUNK_MAGIC)?;
        w.write_u64::<LittleEndian>(self.created_at)?;
        w.write_u32::<LittleEndian>(self.version)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 16];
        r.read_exact(&mut magic)?;
        if magic != CHUNK_MAGIC {
            return Err(Error::corrupt("bad chunk file magic"));
        }
        let created_at = r.read_u64::<LittleEndian>()?;
        let version = r.read_u32::<LittleEndian>()?;
        if version != CHUNK_FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported chunk format version {}",
                version
            )));
        }
        Ok(ChunkHeader {
            created_at,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_index_record_roundtrip() {
        let rec = IndexRecord::new(Key([7u8; KEY_SIZE]), 42, 128);
        let mut buf = Vec::new();
        rec.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), INDEX_RECORD_SIZE);

        let mut cur = Cursor::new(buf);
        let decoded = IndexRecord::decode(&mut cur).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.flags, 0);
    }

    #[test]
    fn test_chunk_control_roundtrip() {
        let ctl = ChunkControl {
            start: Key([0u8; KEY_SIZE]),
            end: Key([0xff; KEY_SIZE]),
            data_offset: 1024,
            compressed_data_size: 512,
            uncompressed_data_size: 2048,
            num: 10,
            bloom_size: 64,
        };
        let mut buf = Vec::new();
        ctl.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_CONTROL_SIZE);

        let mut cur = Cursor::new(buf);
        let decoded = ChunkControl::decode(&mut cur).unwrap();
        assert_eq!(decoded, ctl);
        assert!(decoded.may_contain_range(&Key([0x80; KEY_SIZE])));
    }

    #[test]
    fn test_chunk_header_roundtrip() {
        let hdr = ChunkHeader::new(1_700_000_000);
        let mut buf = Vec::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_HEADER_SIZE);

        let mut cur = Cursor::new(buf);
        let decoded = ChunkHeader::decode(&mut cur).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_chunk_header_rejects_bad_magic() {
        let mut buf = vec![0u8; CHUNK_HEADER_SIZE];
        let mut cur = Cursor::new(&mut buf);
        assert!(ChunkHeader::decode(&mut cur).is_err());
    }
}
