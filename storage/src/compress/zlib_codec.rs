// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Cursor};

use flate2::read::ZlibDecoder as Flate2ZlibDecoder;
use flate2::write::ZlibEncoder as Flate2ZlibEncoder;
use flate2::Compression;

use crate::error::Result;

use super::{StreamDecoder, StreamEncoder};

pub struct Encoder(Flate2ZlibEncoder<Vec<u8>>);

impl Encoder {
    pub fn new() -> Self {
        Encoder(Flate2ZlibEncoder::new(Vec::new(), Compression::default()))
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

pub struct Decoder(Flate2ZlibDecoder<Cursor<Vec<u8>>>);

impl Decoder {
    pub fn new(compressed: Vec<u8>) -> Result<Self> {
        Ok(Decoder(Flate2ZlibDecoder::new(Cursor::new(compressed))))
    }
}

impl StreamDecoder for Decoder {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.0.read_exact(buf)
    }
}
