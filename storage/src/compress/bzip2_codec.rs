// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Cursor};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::error::Result;

use super::{StreamDecoder, StreamEncoder};

pub struct Encoder(BzEncoder<Vec<u8>>);

impl Encoder {
    pub fn new() -> Self {
        Encoder(BzEncoder::new(Vec::new(), Compression::default()))
    }
}

impl StreamEncoder for Encoder {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.0.write_all(buf)
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        self.0.finish()
    }
}

pub struct Decoder(BzDecoder<Cursor<Vec<u8>>>);

impl Decoder {
    pub fn new(compressed: Vec<u8>) -> Result<Self> {
        Ok(Decoder(BzDecoder::new(Cursor::new(compressed))))
    }
}

impl StreamDecoder for Decoder {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.0.read_exact(buf)
    }
}
