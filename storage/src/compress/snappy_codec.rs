// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Cursor};

use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

use crate::error::Result;

use super::{StreamDecoder, StreamEncoder};

pub struct Encoder(Option<FrameEncoder<Vec<u8>>>);

impl Encoder {
    pub fn new() -> Self {
        Encoder(Some(FrameEncoder::new(Vec::new())))
    }
}

impl StreamEncoder for Encoder {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.0.as_mut().expect("encoder already finished").write_all(buf)
    }

    fn finish(mut self: Box<Self>) -> io::Result<Vec<u8>> {
        let mut enc = self.0.take().expect("encoder already finished");
        use std::io::Write;
        enc.flush()?;
        enc.into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

pub struct Decoder(FrameDecoder<Cursor<Vec<u8>>>);

impl Decoder {
    pub fn new(compressed: Vec<u8>) -> Result<Self> {
        Ok(Decoder(FrameDecoder::new(Cursor::new(compressed))))
    }
}

impl StreamDecoder for Decoder {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.0.read_exact(buf)
    }
}
