// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Pluggable stream compression codecs.
//!
//! Every chunk on disk is compressed with exactly one of these algorithms,
//! recorded out-of-band (in `smack-api`'s engine config) rather than per
//! chunk, since a blob never mixes codecs across its lifetime.

mod bzip2_codec;
mod lz4_codec;
mod snappy_codec;
mod zlib_codec;

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Codec identifiers. `Lz4Fast` and `Lz4High` both compress with the same
/// LZ4 stream but at different compression levels (see `lz4_codec`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Zlib,
    Lz4Fast,
    Lz4High,
    Bzip2,
    Snappy,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Zlib => "zlib",
            Algorithm::Lz4Fast => "lz4_fast",
            Algorithm::Lz4High => "lz4_high",
            Algorithm::Bzip2 => "bzip2",
            Algorithm::Snappy => "snappy",
        }
    }

    pub fn from_name(name: &str) -> Option<Algorithm> {
        match name {
            "zlib" => Some(Algorithm::Zlib),
            "lz4_fast" => Some(Algorithm::Lz4Fast),
            "lz4_high" => Some(Algorithm::Lz4High),
            "bzip2" => Some(Algorithm::Bzip2),
            "snappy" => Some(Algorithm::Snappy),
            _ => None,
        }
    }
}

/// Accepts a stream of plaintext writes and produces one compressed blob.
pub trait StreamEncoder {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

/// Reads back a decompressed byte stream incrementally. Chunk reads pull
/// exactly as many bytes as each index record promises, so the decoder
/// never needs to buffer an entire chunk's plaintext at once.
pub trait StreamDecoder {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

pub fn new_encoder(algo: Algorithm) -> Box<dyn StreamEncoder> {
    match algo {
        Algorithm::Zlib => Box::new(zlib_codec::Encoder::new()),
        Algorithm::Lz4Fast => Box::new(lz4_codec::Encoder::new(false)),
        Algorithm::Lz4High => Box::new(lz4_codec::Encoder::new(true)),
        Algorithm::Bzip2 => Box::new(bzip2_codec::Encoder::new()),
        Algorithm::Snappy => Box::new(snappy_codec::Encoder::new()),
    }
}

/// Constructs a decoder for `compressed`. Fallible: a decoder that parses
/// a frame header up front (lz4) can reject a truncated or corrupt buffer
/// right here instead of panicking partway through the first `read_exact`.
pub fn new_decoder(algo: Algorithm, compressed: Vec<u8>) -> Result<Box<dyn StreamDecoder>> {
    Ok(match algo {
        Algorithm::Zlib => Box::new(zlib_codec::Decoder::new(compressed)?),
        Algorithm::Lz4Fast | Algorithm::Lz4High => Box::new(lz4_codec::Decoder::new(compressed)?),
        Algorithm::Bzip2 => Box::new(bzip2_codec::Decoder::new(compressed)?),
        Algorithm::Snappy => Box::new(snappy_codec::Decoder::new(compressed)?),
    })
}
