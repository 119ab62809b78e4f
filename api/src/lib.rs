// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Thin public-facing translation layer over `smack-storage`: converts
//! caller byte slices into fixed-width [`Key`]s, loads an [`EngineConfig`]
//! from JSON, and flattens the storage error taxonomy into a small
//! errno-style surface.
//!
//! The C-style `extern "C"` init/read/write/remove/sync ABI itself is not
//! implemented here; this is the Rust-native layer such a shim would sit
//! on top of.

pub mod config;
pub mod error;

use std::path::{Path, PathBuf};

use log::info;

use smack_storage::{Key, ShardRouter};

pub use config::EngineConfig;
pub use error::{to_errno, ApiError, Result};

pub struct Engine {
    router: std::sync::Arc<ShardRouter>,
}

impl Engine {
    /// Open (or create) an engine rooted at `path` with the given config.
    /// Scans the directory for existing `smack.<n>.<gen>.data` files and
    /// recovers each blob found.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Engine> {
        let router_config = config.to_router_config()?;
        let router = ShardRouter::open(path.as_ref(), router_config)?;
        info!("engine opened at {}", path.as_ref().display());
        Ok(Engine { router })
    }

    /// Convenience constructor reading the config from a JSON string.
    pub fn open_with_json<P: AsRef<Path>>(path: P, json: &str) -> Result<Engine> {
        Self::open(path, EngineConfig::from_str(json)?)
    }

    pub fn write(&self, key: &[u8], data: Vec<u8>) -> Result<()> {
        let key = to_key(key)?;
        self.router.write(key, data)?;
        Ok(())
    }

    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let key = to_key(key)?;
        Ok(self.router.read(&key)?)
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let key = to_key(key)?;
        self.router.remove(key)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.router.sync()?;
        Ok(())
    }

    /// The on-disk data file currently storing `key`'s blob.
    pub fn lookup(&self, key: &[u8]) -> Result<PathBuf> {
        let key = to_key(key)?;
        Ok(self.router.lookup_path(&key)?)
    }

    pub fn total_num(&self) -> i64 {
        self.router.total_num() as i64
    }
}

fn to_key(data: &[u8]) -> Result<Key> {
    Key::from_slice(data).ok_or(ApiError::InvalidKeyLength {
        expected: smack_storage::KEY_SIZE,
        actual: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(b: u8) -> [u8; 64] {
        [b; 64]
    }

    #[test]
    fn test_open_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        engine.write(&key(1), b"v1".to_vec()).unwrap();
        assert_eq!(engine.read(&key(1)).unwrap(), b"v1");
    }

    #[test]
    fn test_wrong_length_key_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        let err = engine.write(&[1, 2, 3], vec![]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidKeyLength { .. }));
    }

    #[test]
    fn test_open_with_json_applies_overrides() {
        let dir = tempdir().unwrap();
        let engine =
            Engine::open_with_json(dir.path(), r#"{"max_cache_size": 8, "codec": "lz4_fast"}"#)
                .unwrap();
        engine.write(&key(2), b"v2".to_vec()).unwrap();
        assert_eq!(engine.read(&key(2)).unwrap(), b"v2");
    }

    #[test]
    fn test_unknown_codec_rejected_at_open() {
        let dir = tempdir().unwrap();
        let err = Engine::open_with_json(dir.path(), r#"{"codec": "rot13"}"#).unwrap_err();
        assert!(matches!(err, ApiError::UnknownCodec(_)));
    }

    #[test]
    fn test_total_num_and_sync() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(engine.total_num(), 1);
        engine.write(&key(3), b"v3".to_vec()).unwrap();
        engine.sync().unwrap();
        assert_eq!(engine.read(&key(3)).unwrap(), b"v3");
    }
}
