// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The blob subsystem: a persistent, append-only, compressed key-value
//! store keyed by fixed-width 64-byte identifiers.
//!
//! Layered bottom-up: [`key`] and [`record`] define the on-disk wire
//! formats; [`bloom`] and [`compress`] are the two pluggable primitives a
//! chunk is built from; [`blob_store`] owns one generation's file pair;
//! [`chunk`] is the in-memory, immutable view of one on-disk chunk;
//! [`blob`] composes two generations into one shard with its write cache,
//! remove set, and background compactor; [`worker`] drives `Blob`
//! flush/compaction passes on a fixed thread pool; [`router`] owns an
//! ordered set of blobs keyed by range and is the crate's top-level
//! entry point.

pub mod blob;
pub mod blob_store;
pub mod bloom;
pub mod chunk;
pub mod compress;
pub mod error;
pub mod key;
pub mod record;
pub mod router;
pub mod worker;

pub use blob::{Blob, BlobConfig};
pub use compress::Algorithm;
pub use error::{Error, Result};
pub use key::{Key, KEY_SIZE};
pub use router::{RouterConfig, ShardRouter};
