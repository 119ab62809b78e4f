// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the storage engine.

use std::io;

use thiserror::Error;

/// Errors returned by the blob store, chunk, blob and router layers.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested key has no live entry in the blob.
    #[error("key not found")]
    NotFound,

    /// A read or write addressed data outside the bounds of the target
    /// chunk or file.
    #[error("offset/size out of range: {0}")]
    OutOfRange(String),

    /// On-disk metadata failed a structural check: bad magic, truncated
    /// record, index/chunk count mismatch, and the like.
    #[error("corrupt on-disk format: {0}")]
    CorruptFormat(String),

    /// Propagated I/O failure from the underlying files.
    #[error("i/o error: {0}")]
    IoError(#[from] io::Error),

    /// A compression or decompression codec failed.
    #[error("codec error: {0}")]
    CodecError(String),
}

impl Error {
    pub fn out_of_range<S: Into<String>>(msg: S) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Error::CorruptFormat(msg.into())
    }

    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Error::CodecError(msg.into())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::NotFound => smack_utils::enoent!(),
            Error::OutOfRange(msg) => smack_utils::einval!(msg),
            Error::CorruptFormat(msg) => smack_utils::eio!(msg),
            Error::IoError(e) => e,
            Error::CodecError(msg) => smack_utils::eio!(format!("codec: {}", msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
