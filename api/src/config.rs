// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! JSON-deserializable configuration for opening an [`crate::Engine`],
//! using a "struct with `#[serde(default = ...)]` fallbacks" pattern so
//! every field is optional in the source JSON.

use serde::Deserialize;

use smack_storage::router::RouterConfig;
use smack_storage::Algorithm;

use crate::error::{ApiError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_bloom_bits")]
    pub bloom_bits: usize,

    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    #[serde(default = "default_max_blob_num")]
    pub max_blob_num: usize,

    #[serde(default = "default_flush_threads")]
    pub flush_threads: usize,

    #[serde(default = "default_split_min_bytes")]
    pub split_min_bytes: u64,

    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_bloom_bits() -> usize {
    4096
}

fn default_max_cache_size() -> usize {
    10_000
}

fn default_max_blob_num() -> usize {
    64
}

fn default_flush_threads() -> usize {
    4
}

fn default_split_min_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_codec() -> String {
    "zlib".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            bloom_bits: default_bloom_bits(),
            max_cache_size: default_max_cache_size(),
            max_blob_num: default_max_blob_num(),
            flush_threads: default_flush_threads(),
            split_min_bytes: default_split_min_bytes(),
            codec: default_codec(),
        }
    }
}

impl EngineConfig {
    pub fn from_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn to_router_config(&self) -> Result<RouterConfig> {
        let codec = Algorithm::from_name(&self.codec)
            .ok_or_else(|| ApiError::UnknownCodec(self.codec.clone()))?;
        Ok(RouterConfig {
            bloom_bits: self.bloom_bits,
            max_cache_size: self.max_cache_size,
            max_blob_num: self.max_blob_num,
            flush_threads: self.flush_threads,
            codec,
            split_min_bytes: self.split_min_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_for_partial_json() {
        let cfg = EngineConfig::from_str(r#"{"max_cache_size": 500}"#).unwrap();
        assert_eq!(cfg.max_cache_size, 500);
        assert_eq!(cfg.bloom_bits, default_bloom_bits());
        assert_eq!(cfg.codec, "zlib");
    }

    #[test]
    fn test_unknown_codec_rejected_at_router_conversion() {
        let mut cfg = EngineConfig::default();
        cfg.codec = "rot13".to_string();
        assert!(cfg.to_router_config().is_err());
    }
}
