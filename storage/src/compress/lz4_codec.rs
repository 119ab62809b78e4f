// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Cursor};

use lz4::Decoder as Lz4Decoder;
use lz4::{Encoder as Lz4Encoder, EncoderBuilder};

use crate::error::{Error, Result};

use super::{StreamDecoder, StreamEncoder};

/// `level` 0 picks LZ4's default fast mode; anything higher enables its
/// high-compression path at the cost of throughput. `Lz4High` in
/// `compress::Algorithm` maps to level 9, which is a reasonable
/// middle ground between ratio and encode time for blob-sized chunks.
const HIGH_COMPRESSION_LEVEL: u32 = 9;

pub struct Encoder(Option<Lz4Encoder<Vec<u8>>>);

impl Encoder {
    pub fn new(high_compression: bool) -> Self {
        let level = if high_compression { HIGH_COMPRESSION_LEVEL } else { 0 };
        let enc = EncoderBuilder::new()
            .level(level)
            .build(Vec::new())
            .expect("lz4 encoder construction is infallible for an in-memory sink");
        Encoder(Some(enc))
    }
}

impl StreamEncoder for Encoder {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.0.as_mut().expect("encoder already finished").write_all(buf)
    }

    fn finish(mut self: Box<Self>) -> io::Result<Vec<u8>> {
        let enc = self.0.take().expect("encoder already finished");
        let (sink, result) = enc.finish();
        result?;
        Ok(sink)
    }
}

pub struct Decoder(Lz4Decoder<Cursor<Vec<u8>>>);

impl Decoder {
    /// `Lz4Decoder::new` eagerly parses the frame header, so a truncated or
    /// corrupt chunk surfaces here rather than on the first `read_exact`.
    pub fn new(compressed: Vec<u8>) -> Result<Self> {
        let dec = Lz4Decoder::new(Cursor::new(compressed))
            .map_err(|e| Error::codec(format!("lz4 frame header decode: {}", e)))?;
        Ok(Decoder(dec))
    }
}

impl StreamDecoder for Decoder {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.0.read_exact(buf)
    }
}
